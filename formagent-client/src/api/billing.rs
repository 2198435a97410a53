use crate::api_client::{ApiClientError, ResourceClient};
use crate::download::Download;
use formagent_core::{Invoice, InvoiceId};

/// `/billing` endpoints.
#[derive(Clone)]
pub struct BillingApi {
    rest: ResourceClient,
}

impl BillingApi {
    pub fn new(rest: ResourceClient) -> Self {
        Self { rest }
    }

    pub async fn invoices(&self) -> Result<Vec<Invoice>, ApiClientError> {
        self.rest.get("/billing/invoices").await
    }

    pub async fn download_invoice(&self, id: InvoiceId) -> Result<Download, ApiClientError> {
        let fallback = format!("invoice-{}.pdf", id);
        self.rest
            .download::<()>(&format!("/billing/invoices/{}/pdf", id), None, &fallback)
            .await
    }
}

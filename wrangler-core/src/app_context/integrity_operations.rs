use super::AppContext;
use crate::errors::DatasetResult;
use crate::services::integrity_service::{CleanupReport, IntegrityReport};

impl AppContext {
    pub async fn check_integrity(&self) -> DatasetResult<IntegrityReport> {
        Ok(self.integrity_service.check().await?)
    }

    /// Remove orphaned storage. Pass `dry_run` to only report what would go.
    pub async fn cleanup_integrity(&self, dry_run: bool) -> DatasetResult<CleanupReport> {
        Ok(self.integrity_service.cleanup(dry_run).await?)
    }
}

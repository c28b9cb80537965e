//! Card ingest pipeline
//!
//! ```text
//! VolumeDirectory --> VolumeLifecycleManager --> ContentValidator
//!        |                    |             --> ConfigReconciler --> DeviceConfigService
//!  SeenVolumeLedger           |             --> MediaUploader    --> MediaUploadService
//!                             +--> lock / dismount / eject (VolumeServices)
//! ```

pub mod lifecycle;
pub mod pass;
pub mod reconcile;
pub mod upload;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::{
    EjectReport, LockOutcome, LockPolicy, ProcessReport, RejectReason, VolumeLifecycleManager,
    VolumeOutcome, VolumeState,
};
pub use pass::{run_pass, PassSummary};
pub use reconcile::{ConfigReconciler, ReconcileResult};
pub use upload::{parse_media_name, MediaName, MediaUploader, NameError, UploadSummary};
pub use validator::ContentValidator;

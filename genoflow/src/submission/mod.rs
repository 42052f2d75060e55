//! Job submission: part validation, file name sanitisation and the
//! per-file quality-control report.

mod qc;
mod validate;

pub use qc::{digest_file, qc_report, FileQc, QcReport, QcStatus, UploadDigest};
pub use validate::{
    check_extension, sanitize_file_name, validate_parts, AcceptedPart, SubmissionValidator,
    GENOME_FIELD,
};

pub mod async_writer;
pub mod clean_reporter;
pub mod report;
pub mod writer_jsonl;

pub use async_writer::spawn_jsonl_writer;
pub use clean_reporter::print_summary;
pub use report::{SessionReport, Summary};
pub use writer_jsonl::ObservationRecord;

pub mod record;
pub mod response;
pub mod trace;

pub use record::{QueryMode, QueryRecord, QueryResults, query_record_schema};
pub use response::{ResponseStatus, ResponseWarning, ToolResponse, ToolResponseFailure};
pub use trace::{PerformanceSnapshot, ResultSet, TimedRun, TraceOutput, parse_result_sets};

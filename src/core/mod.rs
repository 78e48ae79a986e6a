pub mod job;
pub mod job_table;
pub mod pipeline;

pub mod job_record;
pub mod job_worker_lease;

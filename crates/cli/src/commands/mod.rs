pub mod ask;
pub mod ingest;
pub mod serve;
pub mod sources;

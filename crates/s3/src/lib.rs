//! bj-s3: S3 adapter for the backup jobs
//!
//! Implements the `ObjectStore` trait from bj-core on top of aws-sdk-s3,
//! including bounded-memory streaming uploads for archives of unknown size.

mod client;
mod multipart;

pub use client::S3Client;
pub use multipart::MultipartSink;

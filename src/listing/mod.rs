//! Source-side listing.
//!
//! [`lister::ObjectLister`] is the seam between the mirror and whatever
//! enumerates the bucket; [`s3::S3Lister`] is the HTTP implementation.

pub mod lister;
pub mod s3;

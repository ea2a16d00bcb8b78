/*!
 * Object store backends
 *
 * - `s3`: AWS S3 and S3-compatible services through `aws-sdk-s3`
 */

pub mod s3;

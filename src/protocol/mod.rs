/*!
 * Protocol layer for the transfer engine
 *
 * Only S3-compatible object storage is spoken.
 */

pub mod s3;

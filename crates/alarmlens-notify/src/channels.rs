pub mod eventbridge;
pub mod sns;

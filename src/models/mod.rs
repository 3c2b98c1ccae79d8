pub mod image;

pub use image::{ApprovalStatus, ClaimedImage, QueueItem};

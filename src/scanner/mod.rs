pub mod age;
pub mod poller;

pub use poller::ListingPoller;

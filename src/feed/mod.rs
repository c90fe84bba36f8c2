mod poller;

pub use poller::FeedPoller;

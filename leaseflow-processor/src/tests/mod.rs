
pub use slow_container::SlowAcquireContainer;
pub use stub_controller::StubController;
pub use stub_feed::{page, RecordedRequest, StubFeedFactory, StubFeedSource};
pub use stub_observer::{ObserverLog, RecordingObserver};
pub use stub_support::{
    RecordingCheckpointer, RecordingHealthMonitor, StubBootstrapper, StubEstimator,
    StubSynchronizer,
};

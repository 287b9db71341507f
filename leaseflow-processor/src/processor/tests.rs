use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::{
    error::{
        as_feed_error, is_cancelled, is_observer_failure, FeedError, FeedFault, ObserverFailure,
    },
    tests::{page, RecordingCheckpointer, RecordingObserver, StubFeedSource},
};

use super::*;

fn settings(max_item_count: Option<u32>) -> ProcessorSettings {
    ProcessorSettings {
        max_item_count,
        feed_poll_delay: Duration::from_millis(1),
        ..ProcessorSettings::new("0")
    }
}

fn processor(
    source: StubFeedSource,
    settings: ProcessorSettings,
) -> PartitionProcessor<StubFeedSource> {
    PartitionProcessor::new(source, settings, Arc::new(RecordingCheckpointer::new()))
}

#[tokio::test]
async fn test_page_too_large_halves_then_restores() {
    let source = StubFeedSource::scripted(vec![
        Err(FeedFault::PageTooLarge),
        Err(FeedFault::PageTooLarge),
        Ok(page(vec![1, 2], "c1", false)),
        Err(FeedFault::PartitionSplit),
    ]);
    let mut processor = processor(source.clone(), settings(Some(1000)));
    let mut observer = RecordingObserver::new();

    let err = processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(as_feed_error(&err), Some(FeedError::Split { .. })));

    let sizes: Vec<_> = source
        .requests()
        .iter()
        .map(|request| request.max_item_count)
        .collect();
    assert_eq!(sizes, vec![Some(1000), Some(500), Some(250), Some(1000)]);
    assert_eq!(observer.log().delivered(), vec![1, 2]);
}

#[tokio::test]
async fn test_page_too_large_seeds_default() {
    let source = StubFeedSource::scripted(vec![
        Err(FeedFault::PageTooLarge),
        Err(FeedFault::PartitionNotFound),
    ]);
    let mut processor = processor(source.clone(), settings(None));
    let mut observer = RecordingObserver::new();

    processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    let sizes: Vec<_> = source
        .requests()
        .iter()
        .map(|request| request.max_item_count)
        .collect();
    assert_eq!(sizes, vec![None, Some(DEFAULT_MAX_ITEM_COUNT / 2)]);
}

#[tokio::test]
async fn test_page_too_large_at_floor_is_fatal() {
    let source = StubFeedSource::scripted(vec![
        Err(FeedFault::PageTooLarge),
        Err(FeedFault::PageTooLarge),
        Err(FeedFault::PageTooLarge),
    ]);
    let mut processor = processor(source.clone(), settings(Some(2)));
    let mut observer = RecordingObserver::new();

    let err = processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<FeedFault>(), Some(&FeedFault::PageTooLarge));
    assert!(as_feed_error(&err).is_none());
    let sizes: Vec<_> = source
        .requests()
        .iter()
        .map(|request| request.max_item_count)
        .collect();
    assert_eq!(sizes, vec![Some(2), Some(1)]);
    assert_eq!(processor.max_item_count(), Some(1));
}

#[tokio::test]
async fn test_split_carries_latest_continuation() {
    let source = StubFeedSource::scripted(vec![
        Ok(page(vec![1], "c1", true)),
        Ok(page(vec![2], "c2", false)),
        Ok(page(vec![], "c3", false)),
        Err(FeedFault::PartitionSplit),
    ]);
    let mut processor = processor(source.clone(), settings(None));
    let mut observer = RecordingObserver::new();

    let err = processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        as_feed_error(&err),
        Some(&FeedError::Split {
            continuation: Some("c3".to_owned())
        })
    );

    let continuations: Vec<_> = source
        .requests()
        .into_iter()
        .map(|request| request.continuation)
        .collect();
    assert_eq!(
        continuations,
        vec![
            None,
            Some("c1".to_owned()),
            Some("c2".to_owned()),
            Some("c3".to_owned())
        ]
    );

    // Only non-empty pages are delivered, each with its own continuation.
    let log = observer.log();
    let delivered: Vec<_> = log
        .batches
        .iter()
        .map(|(lease, continuation, items)| {
            (lease.as_str(), continuation.as_deref(), items.clone())
        })
        .collect();
    assert_eq!(
        delivered,
        vec![("0", Some("c1"), vec![1]), ("0", Some("c2"), vec![2])]
    );
}

#[tokio::test]
async fn test_not_found_resumes_from_start_continuation() {
    let source = StubFeedSource::scripted(vec![Err(FeedFault::PartitionNotFound)]);
    let mut settings = settings(None);
    settings.start_continuation = Some("c7".to_owned());
    let mut processor = processor(source.clone(), settings);
    let mut observer = RecordingObserver::new();

    let err = processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        as_feed_error(&err),
        Some(&FeedError::NotFound {
            continuation: Some("c7".to_owned())
        })
    );
    assert_eq!(source.requests()[0].continuation.as_deref(), Some("c7"));
}

#[tokio::test]
async fn test_transient_fault_waits_retry_hint() {
    let source = StubFeedSource::scripted(vec![
        Err(FeedFault::Transient {
            reason: "throttled".to_owned(),
            retry_after: Some(Duration::from_millis(50)),
        }),
        Ok(page(vec![1], "c1", false)),
        Err(FeedFault::PartitionNotFound),
    ]);
    let mut processor = processor(source, settings(None));
    let mut observer = RecordingObserver::new();

    let started = Instant::now();
    processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(observer.log().delivered(), vec![1]);
}

#[tokio::test]
async fn test_transient_fault_without_hint_waits_poll_delay() {
    let source = StubFeedSource::scripted(vec![
        Err(FeedFault::Transient {
            reason: "service busy".to_owned(),
            retry_after: None,
        }),
        Err(FeedFault::PartitionNotFound),
    ]);
    let mut settings = settings(None);
    settings.feed_poll_delay = Duration::from_millis(60);
    let mut processor = processor(source.clone(), settings);
    let mut observer = RecordingObserver::new();

    let started = Instant::now();
    let err = processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert!(matches!(as_feed_error(&err), Some(FeedError::NotFound { .. })));
    assert_eq!(source.requests().len(), 2);
}

#[tokio::test]
async fn test_undefined_fault_is_fatal() {
    let source =
        StubFeedSource::scripted(vec![Err(FeedFault::Undefined("bad request".to_owned()))]);
    let mut processor = processor(source, settings(None));
    let mut observer = RecordingObserver::new();

    let err = processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeedFault>(),
        Some(FeedFault::Undefined(_))
    ));
}

#[tokio::test]
async fn test_transport_cancellation_is_not_a_stop() {
    let source = StubFeedSource::scripted(vec![
        Err(FeedFault::Cancelled),
        Ok(page(vec![1], "c1", false)),
        Err(FeedFault::PartitionNotFound),
    ]);
    let mut processor = processor(source, settings(None));
    let mut observer = RecordingObserver::new();

    let err = processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(as_feed_error(&err).is_some());
    assert_eq!(observer.log().delivered(), vec![1]);
}

#[tokio::test]
async fn test_requested_cancellation_stops() {
    let cancel = CancellationToken::new();
    let mut source = StubFeedSource::new();
    let cancel_clone = cancel.clone();
    source.fetch_next_result = Arc::new(Mutex::new(
        move |_request: &FeedRequest<'_>| -> std::result::Result<Page<u64>, FeedFault> {
            cancel_clone.cancel();
            Err(FeedFault::Cancelled)
        },
    ));
    let mut processor = processor(source, settings(None));
    let mut observer = RecordingObserver::new();

    let err = processor.run(&mut observer, cancel).await.unwrap_err();
    assert!(is_cancelled(&err));
}

#[tokio::test]
async fn test_cancel_while_idle() {
    let source = StubFeedSource::scripted(vec![]);
    let mut settings = settings(None);
    settings.feed_poll_delay = Duration::from_secs(60);
    let mut processor = processor(source, settings);
    let mut observer = RecordingObserver::new();

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.cancel();
    });
    let err = processor.run(&mut observer, cancel).await.unwrap_err();
    assert!(is_cancelled(&err));
}

#[tokio::test]
async fn test_observer_error_ends_loop() {
    let source = StubFeedSource::scripted(vec![
        Ok(page(vec![1], "c1", false)),
        Ok(page(vec![2], "c2", false)),
    ]);
    let mut processor = processor(source, settings(None));
    let mut observer = RecordingObserver::new();
    observer.process_changes_result = Arc::new(Mutex::new(|_changes: &[u64]| -> crate::Result<()> {
        Err(ObserverFailure {
            source: anyhow::anyhow!("boom"),
        }
        .into())
    }));

    let err = processor
        .run(&mut observer, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(is_observer_failure(&err));
    // The failed batch's position is not taken as read.
    assert_eq!(processor.continuation(), None);
}

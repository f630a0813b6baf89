mod support;

use std::sync::Arc;
use std::time::Duration;

use recon_sync::test_support::{numbered_records, FixtureFetcher};
use recon_sync::{DatasetKind, InlineResults, LoadError, LoadState, ResultCounts};

#[tokio::test]
async fn concurrent_activations_share_one_fetch_sequence() -> anyhow::Result<()> {
    let fetcher = Arc::new(
        FixtureFetcher::new()
            .with_rows(DatasetKind::Matches, numbered_records(5))
            .with_delay(Duration::from_millis(5)),
    );
    let store = support::store_over(&fetcher, 2);

    let (a, b) = tokio::join!(
        store.activate(DatasetKind::Matches),
        store.activate(DatasetKind::Matches)
    );
    a?;
    b?;

    assert_eq!(fetcher.calls_for(DatasetKind::Matches), vec![0, 1, 2]);
    assert_eq!(store.rows(DatasetKind::Matches).len(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn activations_from_many_tasks_share_one_run() -> anyhow::Result<()> {
    let fetcher = Arc::new(
        FixtureFetcher::new()
            .with_rows(DatasetKind::BackOfficeOnly, numbered_records(9))
            .with_delay(Duration::from_millis(5)),
    );
    let store = support::store_over(&fetcher, 3);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.activate(DatasetKind::BackOfficeOnly).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(fetcher.calls_for(DatasetKind::BackOfficeOnly), vec![0, 1, 2]);
    Ok(())
}

#[tokio::test]
async fn different_kinds_load_independently() -> anyhow::Result<()> {
    let fetcher = Arc::new(
        FixtureFetcher::new()
            .with_rows(DatasetKind::Matches, numbered_records(3))
            .with_rows(DatasetKind::PartnerOnly, numbered_records(4)),
    );
    let store = support::store_over(&fetcher, 2);

    let (a, b) = tokio::join!(
        store.activate(DatasetKind::Matches),
        store.activate(DatasetKind::PartnerOnly)
    );
    a?;
    b?;

    assert_eq!(fetcher.calls_for(DatasetKind::Matches), vec![0, 1]);
    assert_eq!(fetcher.calls_for(DatasetKind::PartnerOnly), vec![0, 1]);
    Ok(())
}

#[tokio::test]
async fn switching_job_cancels_the_running_load() -> anyhow::Result<()> {
    let fetcher = Arc::new(
        FixtureFetcher::new()
            .with_rows(DatasetKind::Matches, numbered_records(40))
            .with_delay(Duration::from_millis(10)),
    );
    let store = support::store_over(&fetcher, 2);

    let running = {
        let store = store.clone();
        tokio::spawn(async move { store.activate(DatasetKind::Matches).await })
    };
    while fetcher.total_calls() < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    store.switch_job("job-2", ResultCounts::default(), InlineResults::new());

    assert_eq!(running.await?, Err(LoadError::Cancelled));
    assert_eq!(store.job_id(), "job-2");
    assert_eq!(store.load_state(DatasetKind::Matches), LoadState::NotLoaded);
    assert!(store.rows(DatasetKind::Matches).is_empty());
    assert!(fetcher.total_calls() < 20);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_job_never_joins_a_load_of_the_previous_job() -> anyhow::Result<()> {
    let fetcher = Arc::new(
        FixtureFetcher::new()
            .with_rows(DatasetKind::Matches, numbered_records(40))
            .with_delay(Duration::from_millis(10)),
    );
    let store = support::store_over(&fetcher, 2);

    let old_job = {
        let store = store.clone();
        tokio::spawn(async move { store.activate(DatasetKind::Matches).await })
    };
    while fetcher.total_calls() < 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    store.switch_job("job-2", ResultCounts { matches: 3, ..Default::default() }, InlineResults::new());
    fetcher.set_rows(DatasetKind::Matches, numbered_records(3));
    store.activate(DatasetKind::Matches).await?;

    assert_eq!(old_job.await?, Err(LoadError::Cancelled));
    assert_eq!(store.job_id(), "job-2");
    assert_eq!(store.rows(DatasetKind::Matches).as_slice(), numbered_records(3).as_slice());
    assert_eq!(store.load_state(DatasetKind::Matches), LoadState::Loaded);
    Ok(())
}

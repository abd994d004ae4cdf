use fairway_core::ShardId;
use fairway_rt::{SchedError, Shard};

#[test]
fn work_submitted_from_one_shard_runs_on_the_target_and_returns() {
    let a = Shard::spawn(ShardId(10));
    let b = Shard::spawn(ShardId(11));
    let a_handle = a.handle();
    let b_handle = b.handle();

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let result: Result<u64, SchedError> = rt.block_on(async move {
        a_handle
            .submit(move || {
                let b_handle = b_handle.clone();
                async move { b_handle.submit(|| async { 41u64 + 1 }).await.unwrap() }
            })
            .await
    });

    assert_eq!(result.unwrap(), 42);
    a.shutdown();
    b.shutdown();
}

#[test]
fn submit_order_from_a_single_caller_is_preserved() {
    let shard = Shard::spawn(ShardId(12));
    let handle = shard.handle();

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let results: Vec<u32> = rt.block_on(async move {
        let mut futures = Vec::new();
        for i in 0..8u32 {
            futures.push(handle.submit(move || async move { i }));
        }
        let mut out = Vec::new();
        for fut in futures {
            out.push(fut.await.unwrap());
        }
        out
    });

    assert_eq!(results, (0..8).collect::<Vec<_>>());
    shard.shutdown();
}

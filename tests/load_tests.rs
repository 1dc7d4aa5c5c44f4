mod common;

#[cfg(test)]
mod tests {
    use super::common::{init_tracing, measure};
    use async_pond::{Config, TaskOutcome, WorkerPoolInner};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_1_small_fast_tasks() {
        println!("\n=== LOAD TEST 1: 10k fast tasks ===");
        let pool = WorkerPoolInner::with_config(Config::io_bound()).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        measure("10k tasks @ 100μs", || async {
            let group = pool.group();
            for _ in 0..10_000 {
                let done = done.clone();
                group
                    .submit(async move {
                        tokio::time::sleep(Duration::from_micros(100)).await;
                        done.fetch_add(1, Ordering::Relaxed);
                    })
                    .await;
            }
            group.wait().await;
        })
        .await;

        assert_eq!(done.load(Ordering::Relaxed), 10_000);
        let metrics = pool.metrics();
        println!("  Completed: {}", metrics.completed_tasks);
        assert!(metrics.running_workers <= pool.max_workers());
        pool.stop_and_wait().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_2_backpressure_many_submitters() {
        println!("\n=== LOAD TEST 2: 16 submitters into a 4-slot queue ===");
        let pool = WorkerPoolInner::new(4, 4).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        measure("16 x 500 tasks", || async {
            let submitters: Vec<_> = (0..16)
                .map(|_| {
                    let pool = pool.clone();
                    let done = done.clone();
                    tokio::spawn(async move {
                        for _ in 0..500 {
                            let done = done.clone();
                            pool.submit(async move {
                                done.fetch_add(1, Ordering::Relaxed);
                            })
                            .await;
                        }
                    })
                })
                .collect();
            for s in submitters {
                s.await.unwrap();
            }
            pool.stop_and_wait().await;
        })
        .await;

        assert_eq!(done.load(Ordering::Relaxed), 8_000);
        let metrics = pool.metrics();
        assert_eq!(metrics.submitted_tasks, 8_000);
        assert_eq!(metrics.completed_tasks, 8_000);
        assert_eq!(metrics.discarded_tasks, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_3_blocking_tasks() {
        println!("\n=== LOAD TEST 3: 200 blocking tasks ===");
        let pool = WorkerPoolInner::with_config(Config::cpu_bound()).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        measure("200 blocking tasks @ 2ms", || async {
            for i in 0..200_usize {
                let done = done.clone();
                pool.submit_blocking(move || {
                    std::thread::sleep(Duration::from_millis(2));
                    done.fetch_add(i % 2 + 1, Ordering::Relaxed);
                })
                .await;
            }
            pool.stop_and_wait().await;
        })
        .await;

        assert_eq!(done.load(Ordering::Relaxed), 300);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_4_stress_with_panics() {
        println!("\n=== LOAD TEST 4: 1k tasks, 10% panic ===");
        init_tracing();
        let handled = Arc::new(AtomicUsize::new(0));
        let h = handled.clone();
        let pool = WorkerPoolInner::with_config(Config::new(8, 500).panic_handler(move |_| {
            h.fetch_add(1, Ordering::Relaxed);
        }))
        .unwrap();

        measure("1k tasks (10% panic)", || async {
            for x in 0..1_000 {
                pool.submit(async move {
                    if x % 10 == 0 {
                        panic!("intentional panic at {}", x);
                    }
                    tokio::time::sleep(Duration::from_micros(100)).await;
                })
                .await;
            }
            pool.stop_and_wait().await;
        })
        .await;

        let metrics = pool.metrics();
        println!("  Success rate: {:.1}%", metrics.success_rate() * 100.0);
        assert_eq!(metrics.completed_tasks, 900);
        assert_eq!(metrics.panicked_tasks, 100);
        assert_eq!(handled.load(Ordering::Relaxed), 100);
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_5_parallel_groups() {
        println!("\n=== LOAD TEST 5: 3 groups x 2k tasks on one pool ===");
        let pool = WorkerPoolInner::with_config(Config::io_bound()).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let run_group = |weight: usize| {
            let pool = pool.clone();
            let done = done.clone();
            async move {
                let group = pool.group();
                for _ in 0..2_000 {
                    let done = done.clone();
                    group
                        .submit(async move {
                            tokio::time::sleep(Duration::from_micros(200)).await;
                            done.fetch_add(weight, Ordering::Relaxed);
                        })
                        .await;
                }
                group.wait().await;
            }
        };

        measure("3 parallel groups", || async {
            tokio::join!(run_group(1), run_group(2), run_group(3));
        })
        .await;

        assert_eq!(done.load(Ordering::Relaxed), 12_000);
        pool.stop_and_wait().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_6_idle_churn() {
        println!("\n=== LOAD TEST 6: bursts separated by idle periods ===");
        init_tracing();
        let pool = WorkerPoolInner::with_config(
            Config::new(6, 50).idle_timeout(Duration::from_millis(5)),
        )
        .unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let group = pool.group();
            for _ in 0..200 {
                let done = done.clone();
                group
                    .submit(async move {
                        tokio::time::sleep(Duration::from_micros(50)).await;
                        done.fetch_add(1, Ordering::Relaxed);
                    })
                    .await;
            }
            group.wait().await;
            assert!(pool.running() <= 6);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert_eq!(done.load(Ordering::Relaxed), 1_000);
        assert_eq!(pool.submit_and_wait(async {}).await, TaskOutcome::Completed);
        pool.stop_and_wait().await;
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn load_test_7_group_context_cancels_backlog() {
        println!("\n=== LOAD TEST 7: first failure skips the backlog ===");
        let pool = WorkerPoolInner::new(2, 2_000).unwrap();
        let executed = Arc::new(AtomicUsize::new(0));
        let group = pool.group_context::<String>(None);

        for i in 0..1_000 {
            let executed = executed.clone();
            group
                .submit(async move {
                    executed.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_micros(100)).await;
                    if i == 10 {
                        return Err(format!("task {i} failed"));
                    }
                    Ok(())
                })
                .await;
        }

        assert_eq!(group.wait().await, Err("task 10 failed".to_string()));
        pool.stop_and_wait().await;

        let executed = executed.load(Ordering::Relaxed);
        println!("  Executed before cancellation: {}", executed);
        assert!(executed < 1_000);
    }
}

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tf_moments::distributed::{
    CollectiveError, CollectiveGroup, Concat, ElementwiseSum, GroupBuilder,
};

fn sum_group(name: &str, workers: usize) -> Arc<CollectiveGroup<Vec<f64>, Vec<f64>>> {
    Arc::new(
        GroupBuilder::new(name, workers)
            .broadcast()
            .reduce(ElementwiseSum)
            .finalize()
            .unwrap(),
    )
}

#[test]
fn test_broadcast_then_reduce_rounds() {
    let workers = 4;
    let group = sum_group("rounds", workers);
    let mut handles = vec![];

    for _ in 0..workers {
        let group = Arc::clone(&group);
        handles.push(thread::spawn(move || {
            let mut ep = group.join_worker().unwrap();
            let scale = (ep.index() + 1) as f64;
            for _ in 0..3 {
                let model = ep.receive().unwrap();
                ep.send(model.iter().map(|x| x * scale).collect()).unwrap();
            }
        }));
    }

    let mut master = group.join_master().unwrap();
    let mut model = vec![1.0, 2.0];
    for _ in 0..3 {
        master.broadcast(model.clone()).unwrap();
        // Workers scale by 1 + 2 + 3 + 4 = 10.
        model = master.reduce().unwrap();
    }
    assert_eq!(model, vec![1000.0, 2000.0]);

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_reduce_waits_for_slowest_worker() {
    let workers = 3;
    let group = sum_group("barrier", workers);
    let mut handles = vec![];

    for _ in 0..workers {
        let group = Arc::clone(&group);
        handles.push(thread::spawn(move || {
            let mut ep = group.join_worker().unwrap();
            if ep.index() == 2 {
                thread::sleep(Duration::from_millis(50));
            }
            ep.send(vec![1.0]).unwrap();
        }));
    }

    let mut master = group.join_master().unwrap();
    assert_eq!(master.reduce().unwrap(), vec![3.0]);

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_sentinel_ends_worker_loop() {
    let group: Arc<CollectiveGroup<usize, Vec<(usize, usize)>>> = Arc::new(
        GroupBuilder::new("loop", 2)
            .broadcast()
            .reduce(Concat)
            .finalize()
            .unwrap(),
    );
    let mut handles = vec![];

    for _ in 0..2 {
        let group = Arc::clone(&group);
        handles.push(thread::spawn(move || {
            let mut ep = group.join_worker().unwrap();
            let mut seen = 0;
            while let Some(step) = ep.receive_until_end().unwrap() {
                ep.send(vec![(ep.index(), *step)]).unwrap();
                seen += 1;
            }
            // A plain receive after the loop gets the follow-up broadcast.
            let last = ep.receive().unwrap();
            (seen, *last)
        }));
    }

    let mut master = group.join_master().unwrap();
    for step in 0..5 {
        master.broadcast(step).unwrap();
        let mut rows = master.reduce().unwrap();
        rows.sort();
        assert_eq!(rows, vec![(0, step), (1, step)]);
    }
    master.broadcast_end().unwrap();
    master.broadcast(99).unwrap();

    for h in handles {
        assert_eq!(h.join().unwrap(), (5, 99));
    }
}

#[test]
fn test_receive_rejects_sentinel() {
    let group = sum_group("strict", 1);
    let mut worker = group.join_worker().unwrap();
    let handle = thread::spawn(move || worker.receive().map(|v| v.len()));

    let mut master = group.join_master().unwrap();
    master.broadcast_end().unwrap();
    assert!(matches!(
        handle.join().unwrap(),
        Err(CollectiveError::UnexpectedEnd { .. })
    ));
}

#[test]
fn test_finalize_requires_full_topology() {
    let missing_reduce = GroupBuilder::<Vec<f64>, Vec<f64>>::new("g", 2)
        .broadcast()
        .finalize();
    assert!(matches!(
        missing_reduce,
        Err(CollectiveError::IncompleteTopology {
            missing: "reduce",
            ..
        })
    ));

    let missing_broadcast = GroupBuilder::<Vec<f64>, Vec<f64>>::new("g", 2)
        .reduce(ElementwiseSum)
        .finalize();
    assert!(matches!(
        missing_broadcast,
        Err(CollectiveError::IncompleteTopology {
            missing: "broadcast",
            ..
        })
    ));

    let no_workers = GroupBuilder::<Vec<f64>, Vec<f64>>::new("g", 0)
        .broadcast()
        .reduce(ElementwiseSum)
        .finalize();
    assert!(matches!(no_workers, Err(CollectiveError::NoWorkers { .. })));
}

#[test]
fn test_endpoints_are_handed_out_once() {
    let group = sum_group("once", 1);
    let _master = group.join_master().unwrap();
    let _worker = group.join_worker().unwrap();

    assert!(matches!(
        group.join_master(),
        Err(CollectiveError::MasterTaken { .. })
    ));
    assert!(matches!(
        group.join_worker(),
        Err(CollectiveError::Exhausted { workers: 1, .. })
    ));
}

#[test]
fn test_dropped_master_disconnects_workers() {
    let group = sum_group("drop", 2);
    let mut worker = group.join_worker().unwrap();
    let handle = thread::spawn(move || worker.receive().map(|v| v.len()));

    let master = group.join_master().unwrap();
    drop(master);
    // The second worker never joins; aborting releases the entry barrier.
    group.abort();

    assert!(matches!(
        handle.join().unwrap(),
        Err(CollectiveError::Disconnected { .. })
    ));
    assert!(matches!(
        group.join_worker(),
        Err(CollectiveError::Aborted { .. })
    ));
}

#[test]
fn test_dropped_worker_fails_reduce() {
    let group = sum_group("lost", 2);
    let first = {
        let group = Arc::clone(&group);
        thread::spawn(move || {
            let mut ep = group.join_worker().unwrap();
            ep.send(vec![1.0]).unwrap();
        })
    };
    let second = group.join_worker().unwrap();
    drop(second);

    let mut master = group.join_master().unwrap();
    assert!(matches!(
        master.reduce(),
        Err(CollectiveError::Disconnected { .. })
    ));
    first.join().unwrap();
}

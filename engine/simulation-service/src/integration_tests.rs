//! End-to-end tests: whole runs driven through the Simulation API

use std::collections::{BTreeMap, HashMap};

use request_registry::{CallAction, DbPhase, Phase, Request, RequestId, RequestType, WorkerId};
use simulation_clock::{
    EventLoopLatency, LatencyProfile, LatencyRange, SimTime, SimulationSpeed, ThreadPoolLatency,
};

use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::observer::{ObservedEvent, RecordingObserver, StopReason};
use crate::simulation::Simulation;

/// Fixed durations at speed 10 (multiplier 1), so every transition time is known exactly
fn fixed_config() -> SimulationConfig {
    SimulationConfig {
        simulation_speed: SimulationSpeed::new(10),
        seed: Some(1),
        latency: LatencyProfile {
            event_loop: EventLoopLatency {
                pre_call: LatencyRange::fixed(300),
                external_call: LatencyRange::fixed(600),
                post_call: LatencyRange::fixed(200),
            },
            thread_pool: ThreadPoolLatency {
                pre_call: LatencyRange::fixed(800),
                external_call: LatencyRange::fixed(800),
            },
        },
        ..SimulationConfig::default()
    }
}

fn ms(ms: u64) -> SimTime {
    SimTime::from_millis(ms)
}

fn recording(config: SimulationConfig) -> Simulation<RecordingObserver> {
    Simulation::new(config, RecordingObserver::new())
}

/// Step one event at a time, checking the slot invariants after each
fn step_checked(sim: &mut Simulation<RecordingObserver>, limit: SimTime) {
    while let Some(next) = sim.next_event_time() {
        if next > limit || sim.step().is_none() {
            break;
        }
        for worker in sim.workers() {
            assert!(worker.event_loop().executing_count() <= 1);
            assert!(worker.thread_pool().busy_count() <= worker.thread_pool().size());
        }
    }
}

#[cfg(test)]
#[allow(clippy::module_inception)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_single_thread_pool_serializes_sync_requests() {
        let mut sim = recording(SimulationConfig { thread_pool_size: 1, ..fixed_config() });
        sim.start().unwrap();
        sim.submit_request(Request::new(1, RequestType::Sync, 0, SimTime::ZERO)).unwrap();
        sim.submit_request(Request::new(2, RequestType::Sync, 0, SimTime::ZERO)).unwrap();

        // first pool tick at 500 takes request 1; request 2 waits
        sim.advance_to(ms(1_000)).unwrap();
        let snapshot = sim.snapshot();
        let worker = &snapshot.workers[0];
        assert_eq!(worker.busy_threads, 1);
        assert_eq!(worker.threads[0].task, Some(1));
        assert_eq!(worker.thread_pool_queue, vec![2]);

        // blocking call 1300..2100 holds the only thread
        sim.advance_to(ms(2_000)).unwrap();
        assert_eq!(sim.snapshot().workers[0].external_calls.len(), 1);
        assert_eq!(sim.snapshot().workers[0].thread_pool_queue, vec![2]);

        assert!(sim.run_until_stopped(ms(60_000)));
        let observer = sim.observer();
        assert_eq!(observer.completions(), vec![1, 2]);

        let released = observer
            .events()
            .iter()
            .find(|e| matches!(e, ObservedEvent::ExternalCall { id: 1, action: CallAction::Remove, .. }))
            .map(ObservedEvent::at);
        let second_assigned = observer
            .events()
            .iter()
            .find(|e| matches!(e, ObservedEvent::TaskProgress { id: 2, slot: Some(0), .. }))
            .map(ObservedEvent::at);
        assert_eq!(released, Some(ms(2_100)));
        assert_eq!(second_assigned, Some(ms(2_500)));

        let completed_at: Vec<_> = observer
            .events()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::Completed { .. }))
            .map(ObservedEvent::at)
            .collect();
        assert_eq!(completed_at, vec![ms(2_100), ms(4_100)]);
    }

    #[test]
    fn test_lone_async_request_phases() {
        let mut sim = recording(fixed_config());
        sim.start().unwrap();
        let id = sim.add_request(RequestType::Async).unwrap();
        assert!(sim.run_until_stopped(ms(60_000)));

        let observer = sim.observer();
        let history = observer.history(id);
        let kinds: Vec<&str> = history
            .iter()
            .map(|e| match e {
                ObservedEvent::Submitted { .. } => "submitted",
                ObservedEvent::PhaseChange { phase: Phase::EventLoop, .. } => "event-loop",
                ObservedEvent::TaskProgress { db_phase: DbPhase::PreAwait, .. } => "pre-call",
                ObservedEvent::ExternalCall { action: CallAction::Add, .. } => "db-add",
                ObservedEvent::ExternalCall { action: CallAction::Remove, .. } => "db-remove",
                ObservedEvent::TaskProgress { db_phase: DbPhase::PostAwait, .. } => "post-call",
                ObservedEvent::Completed { .. } => "completed",
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["submitted", "event-loop", "pre-call", "db-add", "db-remove", "post-call", "completed"]
        );

        let times: Vec<u64> = history.iter().map(|e| e.at().as_millis()).collect();
        assert_eq!(times, vec![0, 0, 100, 400, 1_000, 1_000, 1_200]);

        assert_eq!(observer.stop_reason(), Some(StopReason::Drained));
        assert_eq!(observer.events().last().map(ObservedEvent::at), Some(ms(2_700)));
    }

    #[test]
    fn test_event_loop_runs_one_task_at_a_time() {
        let mut sim = recording(fixed_config());
        sim.start().unwrap();
        for _ in 0..3 {
            sim.add_request(RequestType::Async);
        }
        step_checked(&mut sim, ms(30_000));
        assert!(!sim.is_running());

        // each pre-call starts only after the previous occupant suspended
        let starts: Vec<SimTime> = sim
            .observer()
            .events()
            .iter()
            .filter(|e| matches!(e, ObservedEvent::TaskProgress { db_phase: DbPhase::PreAwait, .. }))
            .map(ObservedEvent::at)
            .collect();
        assert_eq!(starts, vec![ms(100), ms(400), ms(700)]);
        assert_eq!(sim.observer().completions().len(), 3);
    }

    #[test]
    fn test_initial_batch() {
        let config = SimulationConfig {
            num_workers: 2,
            thread_pool_size: 2,
            async_requests: 3,
            sync_requests: 2,
            simulation_speed: SimulationSpeed::new(10),
            seed: Some(11),
            ..SimulationConfig::default()
        };
        let mut sim = recording(config);
        sim.start().unwrap();
        assert!(sim.run_until_stopped(ms(600_000)));

        let observer = sim.observer();
        let submitted: Vec<(RequestId, RequestType, SimTime)> = observer
            .events()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Submitted { id, kind, at, .. } => Some((*id, *kind, *at)),
                _ => None,
            })
            .collect();
        assert_eq!(
            submitted,
            vec![
                (1, RequestType::Async, ms(100)),
                (2, RequestType::Async, ms(100)),
                (3, RequestType::Async, ms(100)),
                (4, RequestType::Sync, ms(100)),
                (5, RequestType::Sync, ms(100)),
            ]
        );

        let mut completions = observer.completions();
        completions.sort_unstable();
        assert_eq!(completions, vec![1, 2, 3, 4, 5]);
        assert_eq!(observer.stop_reason(), Some(StopReason::Drained));

        let metrics = sim.metrics();
        assert_eq!(metrics.submitted_async, 3);
        assert_eq!(metrics.completed_sync, 2);
        assert!(metrics.async_latency.max_ms > 0);
        assert!(metrics.peak_busy_threads <= 4);
    }

    #[test]
    fn test_stop_mid_flight_resets_everything() {
        let config = SimulationConfig {
            num_workers: 2,
            thread_pool_size: 2,
            async_requests: 10,
            sync_requests: 10,
            simulation_speed: SimulationSpeed::new(10),
            seed: Some(3),
            ..SimulationConfig::default()
        };
        let mut sim = recording(config);
        sim.start().unwrap();
        sim.advance_to(ms(2_500)).unwrap();
        assert!(!sim.registry().is_empty());
        assert!(sim.workers().iter().any(|w| !w.external_calls().is_empty() || w.thread_pool().busy_count() > 0));

        sim.stop().unwrap();
        let snapshot = sim.snapshot();
        assert!(!snapshot.running);
        assert!(snapshot.active_requests.is_empty());
        for worker in &snapshot.workers {
            assert!(worker.is_idle());
            assert!(worker.event_loop_queue.is_empty());
            assert!(worker.event_loop_executing.is_none());
            assert!(worker.thread_pool_queue.is_empty());
            assert_eq!(worker.busy_threads, 0);
        }

        let logged = sim.observer().events().len();
        assert_eq!(sim.advance_to(ms(60_000)).unwrap(), 0);
        assert_eq!(sim.observer().events().len(), logged, "nothing fires after stop");
        assert_eq!(sim.observer().stop_reason(), Some(StopReason::Requested));

        // a new run starts from a clean slate
        sim.start().unwrap();
        assert_eq!(sim.run_id(), 2);
        assert_eq!(sim.now(), SimTime::ZERO);
        assert_eq!(sim.add_request(RequestType::Sync), Some(1));
    }

    #[test]
    fn test_dynamic_addition_keeps_run_alive() {
        let mut sim = recording(fixed_config());
        sim.start().unwrap();
        sim.add_request(RequestType::Async);

        // the first request completes at 1200; a new one arrives inside the grace period
        sim.advance_to(ms(2_000)).unwrap();
        assert!(sim.is_running());
        let late = sim.add_request(RequestType::Sync).unwrap();
        sim.advance_to(ms(2_800)).unwrap();
        assert!(sim.is_running(), "stale drain check must not stop a busy run");

        assert!(sim.run_until_stopped(ms(60_000)));
        assert_eq!(sim.observer().completions(), vec![1, late]);
    }

    #[test]
    fn test_external_call_capacity_is_observational() {
        let config = SimulationConfig {
            thread_pool_size: 4,
            external_call_capacity: Some(2),
            ..fixed_config()
        };
        let mut sim = recording(config);
        sim.start().unwrap();
        for id in 1..=4 {
            sim.submit_request(Request::new(id, RequestType::Sync, 0, SimTime::ZERO)).unwrap();
        }

        // all four threads reach their blocking call at 1300
        sim.advance_to(ms(1_500)).unwrap();
        let snapshot = sim.snapshot();
        let worker = &snapshot.workers[0];
        assert_eq!(worker.external_calls.len(), 4);
        let pool = worker.connection_pool.unwrap();
        assert_eq!((pool.size, pool.active, pool.idle), (2, 2, 0));
        assert!(pool.exhausted);
        assert_eq!(sim.workers()[0].external_calls().overflow(), 2);

        assert!(sim.run_until_stopped(ms(60_000)));
        assert_eq!(sim.observer().completions().len(), 4);
    }

    #[test]
    fn test_workers_are_independent() {
        let config = SimulationConfig { num_workers: 2, thread_pool_size: 1, ..fixed_config() };
        let mut sim = recording(config);
        sim.start().unwrap();
        sim.submit_request(Request::new(1, RequestType::Sync, 0, SimTime::ZERO)).unwrap();
        sim.submit_request(Request::new(2, RequestType::Sync, 1, SimTime::ZERO)).unwrap();

        // one thread each, so both start on the first pool tick
        sim.advance_to(ms(600)).unwrap();
        let snapshot = sim.snapshot();
        assert_eq!(snapshot.workers[0].threads[0].task, Some(1));
        assert_eq!(snapshot.workers[1].threads[0].task, Some(2));

        assert!(sim.run_until_stopped(ms(60_000)));
        let events = sim.observer().events();
        let completed_at: HashMap<RequestId, SimTime> = events
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Completed { id, at, .. } => Some((*id, *at)),
                _ => None,
            })
            .collect();
        assert_eq!(completed_at.get(&1), Some(&ms(2_100)));
        assert_eq!(completed_at.get(&2), Some(&ms(2_100)));
    }

    #[test]
    fn test_resubmitted_or_routed_requests_do_not_strand_the_run() {
        let mut sim = recording(fixed_config());
        sim.start().unwrap();
        let request = Request::new(1, RequestType::Async, 0, SimTime::ZERO);
        sim.submit_request(request.clone()).unwrap();

        // completes at 1200; the event loop still remembers the id
        sim.advance_to(ms(1_300)).unwrap();
        assert_eq!(sim.observer().completions(), vec![1]);
        assert!(matches!(
            sim.submit_request(request),
            Err(SimError::AlreadyHandled { id: 1, worker: 0 })
        ));

        let mut routed = Request::new(2, RequestType::Sync, 0, sim.now());
        routed.phase = Phase::ThreadPool;
        assert!(matches!(
            sim.submit_request(routed),
            Err(SimError::NotQueued { id: 2, phase: Phase::ThreadPool })
        ));

        assert!(sim.registry().is_empty());
        assert_eq!(sim.workers()[0].active_tasks(), 0);
        assert!(sim.run_until_stopped(ms(60_000)));
        assert_eq!(sim.observer().stop_reason(), Some(StopReason::Drained));
        assert_eq!(sim.now(), ms(2_700));
        assert_eq!(sim.observer().completions(), vec![1]);
        assert_eq!(sim.metrics().submitted_async + sim.metrics().submitted_sync, 1);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arrivals() -> impl Strategy<Value = Vec<(bool, u64)>> {
        prop::collection::vec((any::<bool>(), 0u64..5_000), 1..20)
    }

    fn random_config(workers: usize, pool: usize, seed: u64) -> SimulationConfig {
        SimulationConfig {
            num_workers: workers,
            thread_pool_size: pool,
            simulation_speed: SimulationSpeed::new(10),
            // long enough that no run drains before the last arrival
            auto_stop_grace_ms: 10_000,
            seed: Some(seed),
            ..SimulationConfig::default()
        }
    }

    fn submit_all(sim: &mut Simulation<RecordingObserver>, mut arrivals: Vec<(bool, u64)>) -> usize {
        arrivals.sort_by_key(|(_, at)| *at);
        let mut submitted = 0;
        for (is_async, at) in arrivals {
            step_checked(sim, ms(at));
            sim.advance_to(ms(at)).unwrap();
            let kind = if is_async { RequestType::Async } else { RequestType::Sync };
            if sim.add_request(kind).is_some() {
                submitted += 1;
            }
        }
        submitted
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_every_request_completes_exactly_once(
            arrivals in arrivals(),
            workers in 1usize..=3,
            pool in 1usize..=4,
            seed in any::<u64>(),
        ) {
            let mut sim = recording(random_config(workers, pool, seed));
            sim.start().unwrap();
            let submitted = submit_all(&mut sim, arrivals);
            step_checked(&mut sim, ms(2_000_000));
            prop_assert!(!sim.is_running());

            let mut counts: BTreeMap<RequestId, usize> = BTreeMap::new();
            for id in sim.observer().completions() {
                *counts.entry(id).or_default() += 1;
            }
            prop_assert_eq!(counts.len(), submitted);
            prop_assert!(counts.values().all(|&n| n == 1));
            prop_assert_eq!(counts.keys().copied().collect::<Vec<_>>(), (1..=submitted as u64).collect::<Vec<_>>());
        }

        #[test]
        fn prop_engines_start_tasks_in_routing_order(
            arrivals in arrivals(),
            workers in 1usize..=3,
            pool in 1usize..=4,
            seed in any::<u64>(),
        ) {
            let mut sim = recording(random_config(workers, pool, seed));
            sim.start().unwrap();
            submit_all(&mut sim, arrivals);
            step_checked(&mut sim, ms(2_000_000));

            let mut owner: HashMap<RequestId, WorkerId> = HashMap::new();
            let mut routed: HashMap<(WorkerId, Phase), Vec<RequestId>> = HashMap::new();
            let mut started: HashMap<(WorkerId, Phase), Vec<RequestId>> = HashMap::new();
            for event in sim.observer().events() {
                match event {
                    ObservedEvent::Submitted { id, worker, .. } => {
                        owner.insert(*id, *worker);
                    }
                    ObservedEvent::PhaseChange { id, phase, .. } => {
                        routed.entry((owner[id], *phase)).or_default().push(*id);
                    }
                    ObservedEvent::TaskProgress { worker, id, db_phase: DbPhase::PreAwait, slot, .. } => {
                        let phase = if slot.is_some() { Phase::ThreadPool } else { Phase::EventLoop };
                        started.entry((*worker, phase)).or_default().push(*id);
                    }
                    _ => {}
                }
            }
            prop_assert_eq!(routed, started);
        }

        #[test]
        fn prop_stop_leaves_nothing_behind(
            arrivals in arrivals(),
            stop_at in 0u64..8_000,
            seed in any::<u64>(),
        ) {
            let mut sim = recording(random_config(2, 2, seed));
            sim.start().unwrap();
            submit_all(&mut sim, arrivals);
            if sim.now() < ms(stop_at) {
                step_checked(&mut sim, ms(stop_at));
            }
            if sim.is_running() {
                sim.stop().unwrap();
            }

            let snapshot = sim.snapshot();
            prop_assert!(snapshot.active_requests.is_empty());
            prop_assert!(snapshot.workers.iter().all(|w| w.is_idle() && w.busy_threads == 0));

            let logged = sim.observer().events().len();
            let later = sim.now() + std::time::Duration::from_secs(60);
            prop_assert_eq!(sim.advance_to(later).unwrap(), 0);
            prop_assert_eq!(sim.observer().events().len(), logged);
        }
    }
}

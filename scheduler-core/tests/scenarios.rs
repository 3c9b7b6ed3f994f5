//! End-to-end scheduling scenarios: each test enqueues/registers just
//! enough state to drive one behavior of `run_once` to a specific,
//! literal outcome.

use std::collections::HashSet;

use scheduler_core::{
    AccountConfig, Action, Balance, CancellationToken, Engine, NullSink, TaskRequest, Timestamp,
};

fn labels(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn single_eligible_match() {
    let mut engine = Engine::new();
    let mut sink = NullSink;

    let config = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0);
    engine
        .add_account("A", config, Some(Balance::from_vec(vec![10.0, 0.0, 0.0, 0.0])))
        .unwrap();
    engine
        .enqueue(TaskRequest::new("T1", "A", labels(&["x"]), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();

    let actions = engine
        .run_once(Timestamp::ZERO, &CancellationToken::new(), &mut sink)
        .unwrap();

    assert_eq!(
        actions,
        vec![Action::Assign {
            worker_id: "W1".to_string(),
            task_id: "T1".to_string(),
            priority: 0,
        }]
    );
    // Charging begins at t=0; the balance snapshot right after the pass
    // that created the assignment hasn't paid any cost yet.
    assert_eq!(engine.account_balance("A").unwrap().get(0), 10.0);
}

#[test]
fn label_mismatch_leaves_task_queued() {
    let mut engine = Engine::new();
    let mut sink = NullSink;

    let config = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0);
    engine
        .add_account("A", config, Some(Balance::from_vec(vec![10.0, 0.0, 0.0, 0.0])))
        .unwrap();
    engine
        .enqueue(TaskRequest::new("T1", "A", labels(&["x"]), Timestamp::ZERO), &mut sink)
        .unwrap();
    // Worker only carries an unrelated label.
    engine.mark_idle("W1", labels(&["y"]), Timestamp::ZERO, &mut sink).unwrap();

    let actions = engine
        .run_once(Timestamp::ZERO, &CancellationToken::new(), &mut sink)
        .unwrap();

    assert!(actions.is_empty());
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.queued_tasks.len(), 1);
    assert_eq!(snapshot.queued_tasks[0].id, "T1");
}

#[test]
fn fanout_cap_admits_only_the_earlier_request() {
    let mut engine = Engine::new();
    let mut sink = NullSink;

    let config = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0).with_max_fanout(1);
    engine
        .add_account("A", config, Some(Balance::from_vec(vec![10.0, 0.0, 0.0, 0.0])))
        .unwrap();
    engine
        .enqueue(TaskRequest::new("T1", "A", labels(&["x"]), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine
        .enqueue(
            TaskRequest::new("T2", "A", labels(&["x"]), Timestamp::seconds(1.0)),
            &mut sink,
        )
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();
    engine.mark_idle("W2", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();

    let actions = engine
        .run_once(Timestamp::seconds(1.0), &CancellationToken::new(), &mut sink)
        .unwrap();

    assert_eq!(actions.len(), 1);
    match &actions[0] {
        Action::Assign { task_id, priority, .. } => {
            assert_eq!(task_id, "T1");
            assert_eq!(*priority, 0);
        }
        other => panic!("expected a single assignment, got {other:?}"),
    }

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.queued_tasks.len(), 1);
    assert_eq!(snapshot.queued_tasks[0].id, "T2");
}

#[test]
fn preemption_of_lower_priority_task() {
    let mut engine = Engine::new();
    let mut sink = NullSink;
    let cancel = CancellationToken::new();

    let config_a = AccountConfig::new(vec![0.0, 0.0, 0.0], 100.0);
    engine
        .add_account("A", config_a, Some(Balance::from_vec(vec![0.0, 0.0, 5.0, 0.0])))
        .unwrap();
    let config_b = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0);
    engine
        .add_account("B", config_b, Some(Balance::from_vec(vec![50.0, 0.0, 0.0, 0.0])))
        .unwrap();

    engine
        .enqueue(TaskRequest::new("T_A", "A", HashSet::new(), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();

    // Only the free capped bucket (index 2) can afford anything, so T_A
    // is matched there.
    let actions = engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();
    assert_eq!(
        actions,
        vec![Action::Assign {
            worker_id: "W1".to_string(),
            task_id: "T_A".to_string(),
            priority: 2,
        }]
    );

    // Drain A's bucket 2 to exactly zero: 5 seconds of priority-2 cost
    // against a 5-credit balance, no recharge.
    let actions = engine.run_once(Timestamp::seconds(5.0), &cancel, &mut sink).unwrap();
    assert!(actions.is_empty());
    assert_eq!(engine.account_balance("A").unwrap().get(2), 0.0);

    engine
        .enqueue(
            TaskRequest::new("T_B", "B", HashSet::new(), Timestamp::seconds(5.0)),
            &mut sink,
        )
        .unwrap();
    let actions = engine.run_once(Timestamp::seconds(5.0), &cancel, &mut sink).unwrap();

    assert_eq!(
        actions,
        vec![
            Action::Preempt {
                worker_id: "W1".to_string(),
                task_id: "T_A".to_string(),
            },
            Action::Assign {
                worker_id: "W1".to_string(),
                task_id: "T_B".to_string(),
                priority: 0,
            },
        ]
    );

    let snapshot = engine.snapshot();
    let requeued = snapshot
        .queued_tasks
        .iter()
        .find(|t| t.id == "T_A")
        .expect("T_A was requeued by preemption");
    assert_eq!(requeued.enqueue_time.as_seconds(), 0.0);
}

#[test]
fn preempting_a_task_credits_its_accrued_cost_back_to_the_account() {
    let mut engine = Engine::new();
    let mut sink = NullSink;
    let cancel = CancellationToken::new();

    let config_a = AccountConfig::new(vec![0.0, 0.0, 0.0], 100.0);
    engine
        .add_account("A", config_a, Some(Balance::from_vec(vec![0.0, 0.0, 5.0, 0.0])))
        .unwrap();
    let config_b = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0);
    engine
        .add_account("B", config_b, Some(Balance::from_vec(vec![50.0, 0.0, 0.0, 0.0])))
        .unwrap();

    engine
        .enqueue(TaskRequest::new("T_A", "A", HashSet::new(), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();
    engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();

    // Only 2 of T_A's 5 credits in bucket 2 are ever spent before it gets
    // cut short; the other 3 were already sitting there untouched.
    engine.run_once(Timestamp::seconds(2.0), &cancel, &mut sink).unwrap();
    assert_eq!(engine.account_balance("A").unwrap().get(2), 3.0);

    engine
        .enqueue(
            TaskRequest::new("T_B", "B", HashSet::new(), Timestamp::seconds(2.0)),
            &mut sink,
        )
        .unwrap();
    let actions = engine.run_once(Timestamp::seconds(2.0), &cancel, &mut sink).unwrap();
    assert_eq!(
        actions,
        vec![
            Action::Preempt {
                worker_id: "W1".to_string(),
                task_id: "T_A".to_string(),
            },
            Action::Assign {
                worker_id: "W1".to_string(),
                task_id: "T_B".to_string(),
                priority: 0,
            },
        ]
    );

    // The 2 credits T_A had accrued are credited back in full: preemption
    // never costs an account quota for work that was thrown away.
    assert_eq!(engine.account_balance("A").unwrap().get(2), 5.0);
}

#[test]
fn disable_preemption_protects_the_account_from_causing_preemption_not_from_being_preempted() {
    let mut engine = Engine::new();
    let mut sink = NullSink;
    let cancel = CancellationToken::new();

    let config_c = AccountConfig::new(vec![0.0, 0.0, 0.0], 100.0).with_disable_preemption(true);
    engine
        .add_account("C", config_c, Some(Balance::from_vec(vec![0.0, 0.0, 5.0, 0.0])))
        .unwrap();
    let config_b = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0);
    engine
        .add_account("B", config_b, Some(Balance::from_vec(vec![50.0, 0.0, 0.0, 0.0])))
        .unwrap();

    engine
        .enqueue(TaskRequest::new("T_C", "C", HashSet::new(), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();
    engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();

    engine
        .enqueue(TaskRequest::new("T_B", "B", HashSet::new(), Timestamp::ZERO), &mut sink)
        .unwrap();
    let actions = engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();

    assert_eq!(
        actions,
        vec![
            Action::Preempt {
                worker_id: "W1".to_string(),
                task_id: "T_C".to_string(),
            },
            Action::Assign {
                worker_id: "W1".to_string(),
                task_id: "T_B".to_string(),
                priority: 0,
            },
        ]
    );
}

#[test]
fn disable_preemption_still_prevents_the_account_from_causing_preemption() {
    let mut engine = Engine::new();
    let mut sink = NullSink;
    let cancel = CancellationToken::new();

    // D is the mirror case: D has disable_preemption and is the
    // *requester* this time, so it must never preempt anyone even
    // though it could otherwise afford to.
    let config_victim = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0);
    engine
        .add_account("V", config_victim, Some(Balance::from_vec(vec![0.0, 0.0, 5.0, 0.0])))
        .unwrap();
    let config_d = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0).with_disable_preemption(true);
    engine
        .add_account("D", config_d, Some(Balance::from_vec(vec![50.0, 0.0, 0.0, 0.0])))
        .unwrap();

    engine
        .enqueue(TaskRequest::new("T_V", "V", HashSet::new(), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();
    engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();

    engine
        .enqueue(TaskRequest::new("T_D", "D", HashSet::new(), Timestamp::ZERO), &mut sink)
        .unwrap();
    let actions = engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();

    assert!(actions.is_empty());
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.queued_tasks.len(), 1);
    assert_eq!(snapshot.queued_tasks[0].id, "T_D");
}

#[test]
fn spillover_demotes_a_running_tasks_standing_for_future_preemption() {
    let mut engine = Engine::new();
    let mut sink = NullSink;
    let cancel = CancellationToken::new();

    let config_a = AccountConfig::new(vec![0.0, 0.0, 0.0], 100.0);
    engine
        .add_account("A2", config_a, Some(Balance::from_vec(vec![5.0, 3.0, 0.0, 0.0])))
        .unwrap();
    let config_b = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0);
    engine
        .add_account("B2", config_b, Some(Balance::from_vec(vec![10.0, 0.0, 0.0, 0.0])))
        .unwrap();

    engine
        .enqueue(TaskRequest::new("T1", "A2", HashSet::new(), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();

    let actions = engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();
    assert_eq!(
        actions,
        vec![Action::Assign {
            worker_id: "W1".to_string(),
            task_id: "T1".to_string(),
            priority: 0,
        }]
    );

    // 5 seconds of priority-0 cost exactly drains bucket 0 with no
    // cascade: balance goes from [5, 3] to [0, 3].
    let actions = engine.run_once(Timestamp::seconds(5.0), &cancel, &mut sink).unwrap();
    assert!(actions.is_empty());
    let balance = engine.account_balance("A2").unwrap();
    assert_eq!(balance.get(0), 0.0);
    assert_eq!(balance.get(1), 3.0);
    assert_eq!(balance.priority_class(), 1);

    // B2 can only afford priority 0 — not enough to beat T1 while T1
    // was still nominally priority 0, but enough once T1's account has
    // visibly slipped to priority-class 1.
    engine
        .enqueue(
            TaskRequest::new("T2", "B2", HashSet::new(), Timestamp::seconds(5.0)),
            &mut sink,
        )
        .unwrap();
    let actions = engine.run_once(Timestamp::seconds(5.0), &cancel, &mut sink).unwrap();

    assert_eq!(
        actions,
        vec![
            Action::Preempt {
                worker_id: "W1".to_string(),
                task_id: "T1".to_string(),
            },
            Action::Assign {
                worker_id: "W1".to_string(),
                task_id: "T2".to_string(),
                priority: 0,
            },
        ]
    );
}

#[test]
fn run_once_is_idempotent_on_unchanged_state() {
    let mut engine = Engine::new();
    let mut sink = NullSink;
    let cancel = CancellationToken::new();

    let config = AccountConfig::new(vec![1.0, 0.0, 0.0], 100.0);
    engine
        .add_account("A", config, Some(Balance::from_vec(vec![10.0, 0.0, 0.0, 0.0])))
        .unwrap();
    engine
        .enqueue(TaskRequest::new("T1", "A", labels(&["x"]), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();

    let first = engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();
    assert_eq!(first.len(), 1);
    let second = engine.run_once(Timestamp::ZERO, &cancel, &mut sink).unwrap();
    assert!(second.is_empty());
}

#[test]
fn p_equals_one_behaves_like_only_priority_zero_of_a_larger_pool() {
    let mut engine = Engine::new();
    let mut sink = NullSink;

    let config = AccountConfig::new(vec![1.0], 100.0);
    engine
        .add_account("A", config, Some(Balance::from_vec(vec![10.0, 0.0])))
        .unwrap();
    engine
        .enqueue(TaskRequest::new("T1", "A", labels(&["x"]), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();

    let actions = engine
        .run_once(Timestamp::ZERO, &CancellationToken::new(), &mut sink)
        .unwrap();
    assert_eq!(
        actions,
        vec![Action::Assign {
            worker_id: "W1".to_string(),
            task_id: "T1".to_string(),
            priority: 0,
        }]
    );
}

#[test]
fn empty_charge_rate_still_dispatches_via_the_free_bucket() {
    let mut engine = Engine::new();
    let mut sink = NullSink;

    let config = AccountConfig::new(vec![], 100.0);
    engine.add_account("A", config, None).unwrap();
    engine
        .enqueue(TaskRequest::new("T1", "A", labels(&["x"]), Timestamp::ZERO), &mut sink)
        .unwrap();
    engine.mark_idle("W1", labels(&["x"]), Timestamp::ZERO, &mut sink).unwrap();

    let actions = engine
        .run_once(Timestamp::ZERO, &CancellationToken::new(), &mut sink)
        .unwrap();
    assert_eq!(actions.len(), 1);
}

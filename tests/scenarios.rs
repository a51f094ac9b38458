//! End-to-end behaviour of one core: dispatch order, resource ceilings,
//! interrupt locks and the timing objects, driven through the public
//! service interface.

mod common;

use std::cell::Cell;

use common::{leak, leak_slice, Harness};
use ecuos::syscall::DispatchOutcome;
use ecuos::{
    AlarmAction, AlarmConfig, AlarmId, AppMode, Ceiling, CoreId, CounterConfig, CounterId,
    Caller, CounterKind, Dispatcher, EventMask, ExpiryPoint, IntLevel, Kernel, KernelConfig,
    OsError, Priority, QueueAlgorithm, ResourceConfig, ResourceId, ScheduleTableConfig,
    ScheduleTableId, ServiceId, Services, StatusLevel, SyscallRequest, TableFlags, TaskConfig,
    TaskContext, TaskId, TaskState,
};

const COUNTER: CounterId = CounterId(0);

static SYSTEM_COUNTER: [CounterConfig; 1] = [CounterConfig {
    name: "system",
    core: CoreId(0),
    kind: CounterKind::Software,
    max_allowed_value: 0xFFFF,
    ticks_per_base: 1,
    min_cycle: 1,
}];

// ---------------------------------------------------------------------------
// Dispatch order
// ---------------------------------------------------------------------------

fn two_task_config(queue: QueueAlgorithm) -> &'static KernelConfig {
    leak(KernelConfig {
        queue,
        tasks: leak_slice(vec![
            TaskConfig::basic("a", CoreId(0), Priority(5)),
            TaskConfig::basic("b", CoreId(0), Priority(3)),
        ]),
        ..KernelConfig::EMPTY
    })
}

#[test]
fn test_higher_priority_is_dispatched_first() {
    const A: TaskId = TaskId(0);
    const B: TaskId = TaskId(1);
    for queue in [QueueAlgorithm::Clz, QueueAlgorithm::Linked] {
        let mut harness = Harness::start(two_task_config(queue));
        harness.remote().activate_task(B).unwrap();
        harness.remote().activate_task(A).unwrap();

        assert_eq!(harness.dispatch(), DispatchOutcome::Start(A), "{queue:?}");
        assert_eq!(harness.core().task_state(B), TaskState::Ready);
        harness.terminate(A).unwrap();
        assert_eq!(harness.dispatch(), DispatchOutcome::Start(B), "{queue:?}");
        harness.terminate(B).unwrap();
        assert_eq!(harness.dispatch(), DispatchOutcome::Idle, "{queue:?}");
    }
}

#[test]
fn test_running_task_keeps_cpu_against_equal_priority() {
    let config = leak(KernelConfig {
        tasks: leak_slice(vec![
            TaskConfig::basic("first", CoreId(0), Priority(4)),
            TaskConfig::basic("second", CoreId(0), Priority(4)),
        ]),
        ..KernelConfig::EMPTY
    });
    let mut harness = Harness::start(config);
    harness.remote().activate_task(TaskId(0)).unwrap();
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(TaskId(0)));

    harness.task(TaskId(0)).activate_task(TaskId(1)).unwrap();
    assert_eq!(harness.dispatch(), DispatchOutcome::Resume(TaskId(0)));
    harness.terminate(TaskId(0)).unwrap();
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(TaskId(1)));
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

const WORKER: TaskId = TaskId(0);
const URGENT: TaskId = TaskId(1);
const R1: ResourceId = ResourceId(0);
const R2: ResourceId = ResourceId(1);

static RESOURCE_TASKS: [TaskConfig; 2] = [
    TaskConfig::basic("worker", CoreId(0), Priority(2)).autostart(&[AppMode::DEFAULT]),
    TaskConfig::basic("urgent", CoreId(0), Priority(6)),
];

static RESOURCES: [ResourceConfig; 2] = [
    ResourceConfig {
        name: "R1",
        ceiling: Ceiling::Task(Priority(7)),
    },
    ResourceConfig {
        name: "R2",
        ceiling: Ceiling::Task(Priority(9)),
    },
];

static RESOURCE_CONFIG: KernelConfig = KernelConfig {
    tasks: &RESOURCE_TASKS,
    resources: &RESOURCES,
    ..KernelConfig::EMPTY
};

#[test]
fn test_resources_release_in_reverse_order() {
    let mut harness = Harness::start(&RESOURCE_CONFIG);
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(WORKER));
    assert_eq!(harness.core().task_priority(WORKER), Priority(2));

    harness.task(WORKER).get_resource(R1).unwrap();
    assert_eq!(harness.core().task_priority(WORKER), Priority(7));
    harness.task(WORKER).get_resource(R2).unwrap();
    assert_eq!(harness.core().task_priority(WORKER), Priority(9));

    assert_eq!(harness.task(WORKER).release_resource(R1), Err(OsError::Nesting));
    assert_eq!(harness.core().task_priority(WORKER), Priority(9));

    harness.task(WORKER).release_resource(R2).unwrap();
    assert_eq!(harness.core().task_priority(WORKER), Priority(7));
    harness.task(WORKER).release_resource(R1).unwrap();
    assert_eq!(harness.core().task_priority(WORKER), Priority(2));
}

#[test]
fn test_ceiling_holds_off_preemption_until_release() {
    let mut harness = Harness::start(&RESOURCE_CONFIG);
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(WORKER));

    harness.task(WORKER).get_resource(R1).unwrap();
    harness.task(WORKER).activate_task(URGENT).unwrap();
    assert_eq!(harness.dispatch(), DispatchOutcome::Resume(WORKER));

    harness.task(WORKER).release_resource(R1).unwrap();
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(URGENT));
    assert_eq!(harness.core().task_state(WORKER), TaskState::Ready);
}

#[test]
fn test_terminate_with_resource_held_is_rejected() {
    let mut harness = Harness::start(&RESOURCE_CONFIG);
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(WORKER));
    harness.task(WORKER).get_resource(R1).unwrap();

    assert_eq!(harness.terminate(WORKER), Err(OsError::Resource));
    assert_eq!(harness.core().running(), Some(WORKER));
    let error = harness.core().last_error().expect("error was recorded");
    assert_eq!(error.error, OsError::Resource);
}

// ---------------------------------------------------------------------------
// Interrupt locks
// ---------------------------------------------------------------------------

#[test]
fn test_suspend_all_nests() {
    let mut harness = Harness::start(&RESOURCE_CONFIG);
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(WORKER));
    let before = harness.core().interrupt_level();

    harness.task(WORKER).suspend_all_interrupts().unwrap();
    harness.task(WORKER).suspend_all_interrupts().unwrap();
    assert_eq!(harness.core().interrupt_level(), IntLevel::ALL);

    harness.task(WORKER).resume_all_interrupts().unwrap();
    assert_eq!(harness.core().interrupt_level(), IntLevel::ALL);
    harness.task(WORKER).resume_all_interrupts().unwrap();
    assert_eq!(harness.core().interrupt_level(), before);

    assert_eq!(
        harness.task(WORKER).resume_all_interrupts(),
        Err(OsError::NoFunc)
    );
    assert_eq!(harness.core().interrupt_level(), before);
}

#[test]
fn test_services_refused_while_interrupts_suspended() {
    let mut harness = Harness::start(&RESOURCE_CONFIG);
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(WORKER));

    harness.task(WORKER).suspend_os_interrupts().unwrap();
    assert_eq!(
        harness.task(WORKER).activate_task(URGENT),
        Err(OsError::DisabledInt)
    );
    assert_eq!(harness.core().task_state(URGENT), TaskState::Suspended);
    harness.task(WORKER).resume_os_interrupts().unwrap();
    harness.task(WORKER).activate_task(URGENT).unwrap();
}

#[test]
fn test_locked_task_is_not_preempted() {
    const A: TaskId = TaskId(0);
    const B: TaskId = TaskId(1);
    let mut harness = Harness::start(two_task_config(QueueAlgorithm::Clz));
    harness.remote().activate_task(B).unwrap();
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(B));

    harness.task(B).suspend_all_interrupts().unwrap();
    harness.remote().activate_task(A).unwrap();
    assert!(!harness.core().needs_dispatch());
    assert_eq!(harness.dispatch(), DispatchOutcome::Resume(B));
    assert_eq!(harness.core().task_state(A), TaskState::Ready);
    assert_eq!(harness.core().interrupt_level(), IntLevel::ALL);

    harness.task(B).resume_all_interrupts().unwrap();
    assert!(harness.core().needs_dispatch());
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(A));
    assert_eq!(harness.core().interrupt_level(), IntLevel::ENABLED);
}

#[test]
fn test_standard_status_task_cannot_end_under_lock() {
    const A: TaskId = TaskId(0);
    let config = leak(KernelConfig {
        status: StatusLevel::Standard,
        tasks: leak_slice(vec![
            TaskConfig::basic("a", CoreId(0), Priority(5)),
            TaskConfig::basic("b", CoreId(0), Priority(3)),
        ]),
        ..KernelConfig::EMPTY
    });
    let mut harness = Harness::start(config);
    harness.remote().activate_task(A).unwrap();
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(A));

    harness.task(A).suspend_all_interrupts().unwrap();
    assert_eq!(harness.terminate(A), Err(OsError::DisabledInt));
    assert_eq!(harness.core().task_state(A), TaskState::Running);
    assert_eq!(harness.core().interrupt_level(), IntLevel::ALL);
    harness.task(A).resume_all_interrupts().unwrap();

    harness.task(A).suspend_os_interrupts().unwrap();
    let chain = SyscallRequest::new(ServiceId::ChainTask, &[1]);
    assert_eq!(harness.task(A).call(chain), Err(OsError::DisabledInt));
    assert_eq!(harness.core().task_state(TaskId(1)), TaskState::Suspended);
    harness.task(A).resume_os_interrupts().unwrap();

    assert_eq!(harness.terminate(A), Ok(0));
    assert_eq!(harness.core().interrupt_level(), IntLevel::ENABLED);
}

#[test]
fn test_chain_to_remote_task_at_limit_keeps_caller() {
    const HEAD: TaskId = TaskId(0);
    const TAIL: TaskId = TaskId(1);
    let config = leak(KernelConfig {
        cores: 2,
        tasks: leak_slice(vec![
            TaskConfig::basic("head", CoreId(0), Priority(2)),
            TaskConfig::basic("tail", CoreId(1), Priority(3)),
        ]),
        ..KernelConfig::EMPTY
    });
    let mut harness = Harness::start(config);
    harness.remote().activate_task(HEAD).unwrap();
    assert_eq!(harness.dispatch(), DispatchOutcome::Start(HEAD));
    harness.task(HEAD).activate_task(TAIL).unwrap();

    let chain = SyscallRequest::new(ServiceId::ChainTask, &[TAIL.index()]);
    assert_eq!(harness.task(HEAD).call(chain), Err(OsError::Limit));
    assert_eq!(harness.core().running(), Some(HEAD));
    let error = harness.core().last_error().copied().unwrap();
    assert_eq!((error.service, error.error), (ServiceId::ChainTask, OsError::Limit));

    // Once the tail finishes on its own core the chain goes through.
    let kernel = &mut harness.kernel;
    let dispatch = SyscallRequest::new(ServiceId::Dispatch, &[]);
    let reply = kernel.call(CoreId(1), Caller::Kernel, dispatch);
    assert_eq!(reply.status, Ok(DispatchOutcome::Start(TAIL).to_word()));
    let terminate = SyscallRequest::new(ServiceId::TerminateTask, &[]);
    assert_eq!(kernel.call(CoreId(1), Caller::Task(TAIL), terminate).status, Ok(0));

    assert_eq!(harness.task(HEAD).call(chain), Ok(0));
    assert_eq!(harness.core().task_state(HEAD), TaskState::Suspended);
    let tail_core = harness.kernel.core(CoreId(1)).unwrap();
    assert_eq!(tail_core.task_state(TAIL), TaskState::Ready);
    assert_eq!(tail_core.activations(TAIL), 1);
}

// ---------------------------------------------------------------------------
// Schedule table synchronisation
// ---------------------------------------------------------------------------

static SYNC_POINTS: [ExpiryPoint; 1] = [ExpiryPoint::at(0).tolerance(10, 100)];

static SYNC_ALARMS: [AlarmConfig; 1] = [AlarmConfig {
    name: "sync_driver",
    counter: COUNTER,
    action: AlarmAction::ScheduleTable(ScheduleTableId(0)),
    autostart: None,
}];

static SYNC_TABLES: [ScheduleTableConfig; 1] = [ScheduleTableConfig {
    name: "synced",
    alarm: AlarmId(0),
    period: 100,
    precision: 0,
    flags: TableFlags::SYNC_EXPLICIT.union(TableFlags::REPEATING),
    expiry_points: &SYNC_POINTS,
    autostart: None,
}];

static SYNC_CONFIG: KernelConfig = KernelConfig {
    counters: &SYSTEM_COUNTER,
    alarms: &SYNC_ALARMS,
    schedule_tables: &SYNC_TABLES,
    ..KernelConfig::EMPTY
};

#[test]
fn test_late_table_is_shortened_in_one_round() {
    use ecuos::{Adjust, TableStatus};
    const TABLE: ScheduleTableId = ScheduleTableId(0);

    let mut harness = Harness::start(&SYNC_CONFIG);
    harness.remote().start_schedule_table_synchron(TABLE).unwrap();
    harness.remote().sync_schedule_table(TABLE, 0).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(TABLE),
        Ok(TableStatus::RunningAndSynchronous)
    );

    // Ten ticks into the round global time already reads fifty.
    harness.tick(COUNTER, 10);
    harness.remote().sync_schedule_table(TABLE, 50).unwrap();
    assert_eq!(harness.core().table_adjustment(TABLE), Adjust::Shorten(40));
    assert_eq!(
        harness.remote().get_schedule_table_status(TABLE),
        Ok(TableStatus::Running)
    );

    // The next round start takes the whole correction.
    harness.tick(COUNTER, 90);
    assert_eq!(harness.core().table_adjustment(TABLE), Adjust::None);
    assert_eq!(
        harness.remote().get_schedule_table_status(TABLE),
        Ok(TableStatus::RunningAndSynchronous)
    );

    // Local and global time now agree: global moved on by 90 as well.
    harness.remote().sync_schedule_table(TABLE, 40).unwrap();
    assert_eq!(harness.core().table_adjustment(TABLE), Adjust::None);
    assert_eq!(
        harness.remote().get_schedule_table_status(TABLE),
        Ok(TableStatus::RunningAndSynchronous)
    );
}

// ---------------------------------------------------------------------------
// Bodies on the direct bridge
// ---------------------------------------------------------------------------

const PERIODIC: TaskId = TaskId(1);
const CONSUMER: TaskId = TaskId(2);
const EV_TICK: EventMask = EventMask(0x4);

static CYCLIC_TASKS: [TaskConfig; 3] = [
    TaskConfig::basic("init", CoreId(0), Priority(1)).autostart(&[AppMode::DEFAULT]),
    TaskConfig::basic("periodic", CoreId(0), Priority(5)),
    TaskConfig::basic("consumer", CoreId(0), Priority(3))
        .with_events()
        .autostart(&[AppMode::DEFAULT]),
];

static CYCLIC_ALARMS: [AlarmConfig; 1] = [AlarmConfig {
    name: "periodic_alarm",
    counter: COUNTER,
    action: AlarmAction::ActivateTask(PERIODIC),
    autostart: None,
}];

static CYCLIC_CONFIG: KernelConfig = KernelConfig {
    tasks: &CYCLIC_TASKS,
    counters: &SYSTEM_COUNTER,
    alarms: &CYCLIC_ALARMS,
    ..KernelConfig::EMPTY
};

#[test]
fn test_cyclic_alarm_drives_producer_and_consumer() {
    common::init_logging();
    let produced = Cell::new(0u32);
    let consumed = Cell::new(0u32);

    let mut init = |ctx: &mut TaskContext<'_, '_>| {
        ctx.set_rel_alarm(AlarmId(0), 10, 10)?;
        ctx.terminate_task()
    };
    let mut periodic = |ctx: &mut TaskContext<'_, '_>| {
        produced.set(produced.get() + 1);
        ctx.set_event(CONSUMER, EV_TICK)?;
        ctx.terminate_task()
    };
    let mut started = false;
    let mut consumer = |ctx: &mut TaskContext<'_, '_>| {
        if started {
            ctx.clear_event(EV_TICK)?;
            consumed.set(consumed.get() + 1);
        }
        started = true;
        ctx.wait_event(EV_TICK)
    };

    let mut kernel = Kernel::new(&CYCLIC_CONFIG).unwrap();
    kernel.start_os(AppMode::DEFAULT);
    {
        let mut bridge = kernel.bridge();
        let mut dispatcher = Dispatcher::new(&mut bridge, &CYCLIC_CONFIG, CoreId(0));
        dispatcher.register_task(TaskId(0), &mut init).unwrap();
        dispatcher.register_task(PERIODIC, &mut periodic).unwrap();
        dispatcher.register_task(CONSUMER, &mut consumer).unwrap();
        dispatcher.run();
        dispatcher.tick_n(COUNTER, 35);
    }

    assert_eq!(produced.get(), 3);
    assert_eq!(consumed.get(), 3);
    let core = kernel.core(CoreId(0)).unwrap();
    assert_eq!(core.task_state(CONSUMER), TaskState::Waiting);
    assert_eq!(core.task_state(PERIODIC), TaskState::Suspended);
    assert_eq!(core.running(), None);
}

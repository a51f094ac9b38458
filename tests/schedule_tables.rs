//! Schedule table lifecycle: starting, stopping, chaining and explicit
//! synchronisation, observed through the tasks the expiry points activate.

mod common;

use common::Harness;
use ecuos::{
    AlarmAction, AlarmConfig, AlarmId, AppMode, CoreId, CounterConfig, CounterId, CounterKind,
    ExpiryPoint, KernelConfig, OsError, Priority, ScheduleTableConfig, ScheduleTableId, Services,
    TableAutostart, TableFlags, TableStart, TableStatus, TaskConfig, TaskId,
};

const COUNTER: CounterId = CounterId(0);
const FRAME_TASK: TaskId = TaskId(0);
const SYNC_TASK: TaskId = TaskId(1);

/// Single shot, points at 10 and 30, period 50.
const ONCE: ScheduleTableId = ScheduleTableId(0);
/// Repeating, one point at 0, period 20.
const LOOP: ScheduleTableId = ScheduleTableId(1);
/// Explicitly synchronised, points at 0 and 20, period 40.
const SYNCED: ScheduleTableId = ScheduleTableId(2);

static TASKS: [TaskConfig; 2] = [
    TaskConfig::basic("frame_task", CoreId(0), Priority(3)).activations(8),
    TaskConfig::basic("sync_task", CoreId(0), Priority(2)).activations(8),
];

static COUNTERS: [CounterConfig; 1] = [CounterConfig {
    name: "system",
    core: CoreId(0),
    kind: CounterKind::Hardware,
    max_allowed_value: 0xFFFF,
    ticks_per_base: 1,
    min_cycle: 1,
}];

static ALARMS: [AlarmConfig; 3] = [
    AlarmConfig {
        name: "once_driver",
        counter: COUNTER,
        action: AlarmAction::ScheduleTable(ONCE),
        autostart: None,
    },
    AlarmConfig {
        name: "loop_driver",
        counter: COUNTER,
        action: AlarmAction::ScheduleTable(LOOP),
        autostart: None,
    },
    AlarmConfig {
        name: "synced_driver",
        counter: COUNTER,
        action: AlarmAction::ScheduleTable(SYNCED),
        autostart: None,
    },
];

static ONCE_POINTS: [ExpiryPoint; 2] = [
    ExpiryPoint::at(10).activating(&[FRAME_TASK]),
    ExpiryPoint::at(30).activating(&[FRAME_TASK]),
];

static LOOP_POINTS: [ExpiryPoint; 1] = [ExpiryPoint::at(0).activating(&[FRAME_TASK])];

static SYNCED_POINTS: [ExpiryPoint; 2] = [
    ExpiryPoint::at(0).activating(&[SYNC_TASK]).tolerance(5, 5),
    ExpiryPoint::at(20).tolerance(5, 5),
];

static TABLES: [ScheduleTableConfig; 3] = [
    ScheduleTableConfig {
        name: "once",
        alarm: AlarmId(0),
        period: 50,
        precision: 0,
        flags: TableFlags::empty(),
        expiry_points: &ONCE_POINTS,
        autostart: None,
    },
    ScheduleTableConfig {
        name: "loop",
        alarm: AlarmId(1),
        period: 20,
        precision: 0,
        flags: TableFlags::REPEATING,
        expiry_points: &LOOP_POINTS,
        autostart: None,
    },
    ScheduleTableConfig {
        name: "synced",
        alarm: AlarmId(2),
        period: 40,
        precision: 2,
        flags: TableFlags::SYNC_EXPLICIT.union(TableFlags::REPEATING),
        expiry_points: &SYNCED_POINTS,
        autostart: None,
    },
];

static CONFIG: KernelConfig = KernelConfig {
    tasks: &TASKS,
    counters: &COUNTERS,
    alarms: &ALARMS,
    schedule_tables: &TABLES,
    ..KernelConfig::EMPTY
};

fn frames(harness: &Harness) -> u8 {
    harness.core().activations(FRAME_TASK)
}

#[test]
fn test_relative_start_runs_one_round() {
    let mut harness = Harness::start(&CONFIG);
    harness.remote().start_schedule_table_rel(ONCE, 5).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(ONCE),
        Ok(TableStatus::Running)
    );

    harness.tick(COUNTER, 14);
    assert_eq!(frames(&harness), 0);
    harness.tick(COUNTER, 1);
    assert_eq!(frames(&harness), 1);
    harness.tick(COUNTER, 20);
    assert_eq!(frames(&harness), 2);

    // The round ends at 5 + 50.
    harness.tick(COUNTER, 19);
    assert_eq!(
        harness.remote().get_schedule_table_status(ONCE),
        Ok(TableStatus::Running)
    );
    harness.tick(COUNTER, 1);
    assert_eq!(
        harness.remote().get_schedule_table_status(ONCE),
        Ok(TableStatus::Stopped)
    );
    harness.tick(COUNTER, 100);
    assert_eq!(frames(&harness), 2);
}

#[test]
fn test_start_rejects_bad_offset_and_double_start() {
    let mut harness = Harness::start(&CONFIG);
    assert_eq!(
        harness.remote().start_schedule_table_rel(ONCE, 0),
        Err(OsError::Value)
    );
    harness.remote().start_schedule_table_rel(ONCE, 1).unwrap();
    assert_eq!(
        harness.remote().start_schedule_table_rel(ONCE, 1),
        Err(OsError::State)
    );
    assert_eq!(
        harness.remote().start_schedule_table_abs(ONCE, 3),
        Err(OsError::State)
    );
}

#[test]
fn test_absolute_start_waits_for_counter_value() {
    let mut harness = Harness::start(&CONFIG);
    harness.remote().start_schedule_table_abs(ONCE, 100).unwrap();
    harness.tick(COUNTER, 109);
    assert_eq!(frames(&harness), 0);
    harness.tick(COUNTER, 1);
    assert_eq!(frames(&harness), 1);
    assert_eq!(harness.remote().get_counter_value(COUNTER), Ok(110));
}

#[test]
fn test_stop_cancels_pending_points() {
    let mut harness = Harness::start(&CONFIG);
    harness.remote().start_schedule_table_rel(LOOP, 2).unwrap();
    harness.tick(COUNTER, 2);
    assert_eq!(frames(&harness), 1);

    harness.remote().stop_schedule_table(LOOP).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(LOOP),
        Ok(TableStatus::Stopped)
    );
    harness.tick(COUNTER, 60);
    assert_eq!(frames(&harness), 1);
    assert_eq!(
        harness.remote().stop_schedule_table(LOOP),
        Err(OsError::NoFunc)
    );
}

#[test]
fn test_next_table_takes_over_at_round_end() {
    let mut harness = Harness::start(&CONFIG);
    harness.remote().start_schedule_table_rel(ONCE, 1).unwrap();
    harness.remote().next_schedule_table(ONCE, LOOP).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(LOOP),
        Ok(TableStatus::Next)
    );

    // ONCE activates at 11 and 31 and ends at 51, where LOOP's point 0
    // fires straight away.
    harness.tick(COUNTER, 50);
    assert_eq!(frames(&harness), 2);
    harness.tick(COUNTER, 1);
    assert_eq!(frames(&harness), 3);
    assert_eq!(
        harness.remote().get_schedule_table_status(ONCE),
        Ok(TableStatus::Stopped)
    );
    assert_eq!(
        harness.remote().get_schedule_table_status(LOOP),
        Ok(TableStatus::Running)
    );

    harness.tick(COUNTER, 40);
    assert_eq!(frames(&harness), 5);
}

#[test]
fn test_stopping_a_table_drops_its_successor() {
    let mut harness = Harness::start(&CONFIG);
    harness.remote().start_schedule_table_rel(ONCE, 1).unwrap();
    harness.remote().next_schedule_table(ONCE, LOOP).unwrap();
    harness.remote().stop_schedule_table(ONCE).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(LOOP),
        Ok(TableStatus::Stopped)
    );
    harness.tick(COUNTER, 100);
    assert_eq!(frames(&harness), 0);
}

#[test]
fn test_next_requires_running_source() {
    let mut harness = Harness::start(&CONFIG);
    assert_eq!(
        harness.remote().next_schedule_table(ONCE, LOOP),
        Err(OsError::NoFunc)
    );
    // Different synchronisation strategy.
    harness.remote().start_schedule_table_rel(ONCE, 1).unwrap();
    assert_eq!(
        harness.remote().next_schedule_table(ONCE, SYNCED),
        Err(OsError::Id)
    );
}

#[test]
fn test_synchron_start_waits_for_global_time() {
    let mut harness = Harness::start(&CONFIG);
    harness.remote().start_schedule_table_synchron(SYNCED).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(SYNCED),
        Ok(TableStatus::Waiting)
    );
    harness.tick(COUNTER, 100);
    assert_eq!(harness.core().activations(SYNC_TASK), 0);

    // Global time is 10 into the round: point 0 is 30 ticks away.
    harness.remote().sync_schedule_table(SYNCED, 10).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(SYNCED),
        Ok(TableStatus::RunningAndSynchronous)
    );
    harness.tick(COUNTER, 29);
    assert_eq!(harness.core().activations(SYNC_TASK), 0);
    harness.tick(COUNTER, 1);
    assert_eq!(harness.core().activations(SYNC_TASK), 1);
}

#[test]
fn test_sync_within_precision_stays_synchronous() {
    let mut harness = Harness::start(&CONFIG);
    harness.remote().start_schedule_table_synchron(SYNCED).unwrap();
    harness.remote().sync_schedule_table(SYNCED, 0).unwrap();
    harness.tick(COUNTER, 12);

    // Two ticks of drift is inside the precision of the table.
    harness.remote().sync_schedule_table(SYNCED, 14).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(SYNCED),
        Ok(TableStatus::RunningAndSynchronous)
    );

    harness.remote().set_schedule_table_async(SYNCED).unwrap();
    assert_eq!(
        harness.remote().get_schedule_table_status(SYNCED),
        Ok(TableStatus::Running)
    );
}

#[test]
fn test_sync_argument_checks() {
    let mut harness = Harness::start(&CONFIG);
    assert_eq!(
        harness.remote().sync_schedule_table(LOOP, 0),
        Err(OsError::Id)
    );
    assert_eq!(
        harness.remote().sync_schedule_table(SYNCED, 0),
        Err(OsError::State)
    );
    harness.remote().start_schedule_table_synchron(SYNCED).unwrap();
    assert_eq!(
        harness.remote().sync_schedule_table(SYNCED, 41),
        Err(OsError::Value)
    );
    assert_eq!(
        harness.remote().start_schedule_table_synchron(LOOP),
        Err(OsError::Id)
    );
}

static AUTOSTART_TABLES: [ScheduleTableConfig; 1] = [ScheduleTableConfig {
    name: "boot_loop",
    alarm: AlarmId(0),
    period: 20,
    precision: 0,
    flags: TableFlags::REPEATING,
    expiry_points: &LOOP_POINTS,
    autostart: Some(TableAutostart {
        modes: &[AppMode::DEFAULT],
        start: TableStart::Relative(5),
    }),
}];

static AUTOSTART_ALARMS: [AlarmConfig; 1] = [AlarmConfig {
    name: "boot_driver",
    counter: COUNTER,
    action: AlarmAction::ScheduleTable(ScheduleTableId(0)),
    autostart: None,
}];

static AUTOSTART_CONFIG: KernelConfig = KernelConfig {
    tasks: &TASKS,
    counters: &COUNTERS,
    alarms: &AUTOSTART_ALARMS,
    schedule_tables: &AUTOSTART_TABLES,
    ..KernelConfig::EMPTY
};

#[test]
fn test_autostart_table_runs_from_startup() {
    let mut harness = Harness::start(&AUTOSTART_CONFIG);
    assert_eq!(
        harness.remote().get_schedule_table_status(ScheduleTableId(0)),
        Ok(TableStatus::Running)
    );
    harness.tick(COUNTER, 5);
    assert_eq!(frames(&harness), 1);
    harness.tick(COUNTER, 40);
    assert_eq!(frames(&harness), 3);
}

//! # ecuos Demo Firmware
//!
//! Single-core image for an STM32F4-class Cortex-M4 showing the kernel
//! objects working together:
//!
//! | Object      | Kind                  | Behaviour                                     |
//! |-------------|-----------------------|-----------------------------------------------|
//! | `init`      | task, prio 1, autostart | arms the 10 ms alarm, starts the schedule table |
//! | `sample`    | task, prio 4          | activated every 10 ms by `sample_alarm`       |
//! | `control`   | extended task, prio 3 | waits for `EV_SAMPLE`, then computes          |
//! | `logger`    | task, prio 2, non-preemptive | activated at offset 50 of `frame_table` |
//! | `frame_table` | schedule table, 100 ticks | repeating; sets `EV_SAMPLE` at offset 20 |
//! | `RES_DATA`  | resource, ceiling 4   | shared by `sample` and `control`              |
//!
//! Build with `cargo build --release --no-default-features --features firmware
//! --target thumbv7em-none-eabihf`.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use ecuos::arch::cortex_m4::{configure_systick, take_tick, wait_for_interrupt};
use ecuos::{
    AlarmAction, AlarmConfig, AlarmId, AppMode, Ceiling, CoreId, CounterConfig, CounterId, CounterKind,
    Dispatcher, EventMask, Exit, ExpiryPoint, Kernel, KernelConfig, OsError, Priority,
    ResourceConfig, ResourceId, ScheduleTableConfig, ScheduleTableId, Services, TableFlags,
    TaskBody, TaskConfig, TaskContext, TaskId,
};

// ---------------------------------------------------------------------------
// Configuration tables
// ---------------------------------------------------------------------------

const INIT: TaskId = TaskId(0);
const SAMPLE: TaskId = TaskId(1);
const CONTROL: TaskId = TaskId(2);
const LOGGER: TaskId = TaskId(3);

const SYSTEM_COUNTER: CounterId = CounterId(0);
const SAMPLE_ALARM: AlarmId = AlarmId(0);
const FRAME_TABLE: ScheduleTableId = ScheduleTableId(0);
const RES_DATA: ResourceId = ResourceId(0);

const EV_SAMPLE: EventMask = EventMask(0x1);

static TASKS: [TaskConfig; 4] = [
    TaskConfig::basic("init", CoreId(0), Priority(1)).autostart(&[AppMode::DEFAULT]),
    TaskConfig::basic("sample", CoreId(0), Priority(4)),
    TaskConfig::basic("control", CoreId(0), Priority(3))
        .with_events()
        .autostart(&[AppMode::DEFAULT]),
    TaskConfig::basic("logger", CoreId(0), Priority(2)).non_preemptive(),
];

static RESOURCES: [ResourceConfig; 1] = [ResourceConfig {
    name: "RES_DATA",
    ceiling: Ceiling::Task(Priority(4)),
}];

static COUNTERS: [CounterConfig; 1] = [CounterConfig {
    name: "system",
    core: CoreId(0),
    kind: CounterKind::Hardware,
    max_allowed_value: 0xFFFF,
    ticks_per_base: 1,
    min_cycle: 1,
}];

static ALARMS: [AlarmConfig; 2] = [
    AlarmConfig {
        name: "sample_alarm",
        counter: SYSTEM_COUNTER,
        action: AlarmAction::ActivateTask(SAMPLE),
        autostart: None,
    },
    AlarmConfig {
        name: "frame_driver",
        counter: SYSTEM_COUNTER,
        action: AlarmAction::ScheduleTable(FRAME_TABLE),
        autostart: None,
    },
];

static FRAME_POINTS: [ExpiryPoint; 2] = [
    ExpiryPoint::at(20).setting(&[(CONTROL, EV_SAMPLE)]),
    ExpiryPoint::at(50).activating(&[LOGGER]),
];

static TABLES: [ScheduleTableConfig; 1] = [ScheduleTableConfig {
    name: "frame_table",
    alarm: AlarmId(1),
    period: 100,
    precision: 0,
    flags: TableFlags::REPEATING,
    expiry_points: &FRAME_POINTS,
    autostart: None,
}];

static CONFIG: KernelConfig = KernelConfig {
    tasks: &TASKS,
    resources: &RESOURCES,
    counters: &COUNTERS,
    alarms: &ALARMS,
    schedule_tables: &TABLES,
    ..KernelConfig::EMPTY
};

// ---------------------------------------------------------------------------
// Task bodies
// ---------------------------------------------------------------------------

/// Data shared between `sample` and `control` under `RES_DATA`.
struct Shared {
    latest: u32,
}

struct Sample<'s> {
    shared: &'s core::cell::Cell<Shared>,
    raw: u32,
}

impl TaskBody for Sample<'_> {
    fn run(&mut self, ctx: &mut TaskContext<'_, '_>) -> Result<Exit, OsError> {
        self.raw = self.raw.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        ctx.get_resource(RES_DATA)?;
        self.shared.set(Shared { latest: self.raw >> 16 });
        ctx.release_resource(RES_DATA)?;
        ctx.terminate_task()
    }
}

/// Waits for a fresh sample each frame, filters it and waits again.
struct Control<'s> {
    shared: &'s core::cell::Cell<Shared>,
    filtered: u32,
    waiting: bool,
}

impl TaskBody for Control<'_> {
    fn run(&mut self, ctx: &mut TaskContext<'_, '_>) -> Result<Exit, OsError> {
        if self.waiting {
            ctx.clear_event(EV_SAMPLE)?;
            ctx.get_resource(RES_DATA)?;
            let sample = self.shared.replace(Shared { latest: 0 }).latest;
            ctx.release_resource(RES_DATA)?;
            self.filtered = (self.filtered * 3 + sample) / 4;
        }
        self.waiting = true;
        ctx.wait_event(EV_SAMPLE)
    }

    fn restart(&mut self) {
        self.waiting = false;
    }
}

#[entry]
fn main() -> ! {
    let Some(mut peripherals) = cortex_m::Peripherals::take() else {
        halt();
    };
    let Ok(mut kernel) = Kernel::new(&CONFIG) else {
        halt();
    };
    kernel.start_os(AppMode::DEFAULT);

    let shared = core::cell::Cell::new(Shared { latest: 0 });
    let mut init = |ctx: &mut TaskContext<'_, '_>| {
        ctx.set_rel_alarm(SAMPLE_ALARM, 10, 10)?;
        ctx.start_schedule_table_rel(FRAME_TABLE, 1)?;
        ctx.terminate_task()
    };
    let mut sample = Sample {
        shared: &shared,
        raw: 1,
    };
    let mut control = Control {
        shared: &shared,
        filtered: 0,
        waiting: false,
    };
    let mut logger = |ctx: &mut TaskContext<'_, '_>| {
        let _elapsed = ctx.get_counter_value(SYSTEM_COUNTER)?;
        ctx.terminate_task()
    };

    let mut bridge = kernel.bridge();
    let mut dispatcher = Dispatcher::new(&mut bridge, &CONFIG, CoreId(0));
    let registered = [
        dispatcher.register_task(INIT, &mut init),
        dispatcher.register_task(SAMPLE, &mut sample),
        dispatcher.register_task(CONTROL, &mut control),
        dispatcher.register_task(LOGGER, &mut logger),
    ];
    if registered.iter().any(Result::is_err) {
        halt();
    }

    configure_systick(&mut peripherals.SYST);
    loop {
        dispatcher.run();
        if take_tick() {
            dispatcher.tick(SYSTEM_COUNTER);
        } else {
            wait_for_interrupt();
        }
    }
}

fn halt() -> ! {
    loop {
        wait_for_interrupt();
    }
}

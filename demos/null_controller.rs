use std::{sync::Arc, thread, time::Duration};

use servo_bus::{
    Controller, ControllerConfig, CrawlTransition, NullDriver, PositionControl, TransformExt,
};

fn main() -> anyhow::Result<()> {
    let cfg = ControllerConfig {
        silent: true,
        silent_timeout: Duration::from_millis(500),
        heartbeat: Duration::from_secs(2),
        ..ControllerConfig::default()
    };
    let controller = Controller::new("null", NullDriver::new(2).with_bandwidth_delay(), cfg);
    controller.init()?;

    let left = controller.servo(0)?;
    let right = controller.servo(1)?.reversed();
    left.attach(Arc::new(CrawlTransition))?;
    right.attach(Arc::new(CrawlTransition))?;

    let a = left.set_position(1.0)?;
    let b = right.set_position(1.0)?;
    a.wait()?;
    b.wait()?;
    println!("left at {:.3}, right at {:.3}", left.actual_position(), right.actual_position());

    thread::sleep(Duration::from_secs(1));
    println!("silent now: {}", controller.is_silent_now()?);

    controller.close()?;
    Ok(())
}

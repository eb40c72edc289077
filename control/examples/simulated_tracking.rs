// Drive the control loop with synthetic detections and a recording actuator
use env_logger::Env;
use locktrack::{Bbox, Detection, Point};
use motion_control::{
    frame_channel, AtomicGate, ConfigSource, ConfigStore, ControlConfig, Controller, Frame,
    QuickMove, SharedActuator, StubActuator,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const FOV: f32 = 320.0;
const FPS: u64 = 60;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let store = Arc::new(ConfigStore::new(ControlConfig {
        fov: FOV,
        ..ControlConfig::default()
    }));
    let stub = StubActuator::new();
    let actuator = SharedActuator::new(stub.clone());
    let gate = Arc::new(AtomicGate::new(false));

    let mut controller = Controller::new(store.clone(), actuator.clone(), gate.clone());
    let (frames, source) = frame_channel(2);
    controller.start(Box::new(source))?;

    // Two targets: one circling near the center, one drifting across the edge
    let producing = Arc::new(AtomicBool::new(true));
    let producer = {
        let producing = Arc::clone(&producing);
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(11);
            let start = Instant::now();
            while producing.load(Ordering::Acquire) {
                let t = start.elapsed().as_secs_f32();
                let mut detections = Vec::new();

                let (cx, cy) = (200.0 + 40.0 * (t * 1.5).cos(), 150.0 + 25.0 * (t * 1.5).sin());
                if (t % 2.0) < 1.8 {
                    // Brief dropouts simulate occlusion
                    detections.push(jittered_box(&mut rng, cx, cy, 30.0, 70.0, 0.85));
                }
                let ex = 20.0 + (t * 60.0) % 280.0;
                detections.push(jittered_box(&mut rng, ex, 260.0, 24.0, 56.0, 0.6));

                frames.send(Frame::new(detections, FOV));
                thread::sleep(Duration::from_millis(1000 / FPS));
            }
        })
    };

    log::info!("Tracking with the gate closed");
    thread::sleep(Duration::from_millis(500));
    log::info!("Opening the gate");
    gate.set(true);
    thread::sleep(Duration::from_secs(2));

    log::info!("Switching to the coupled smoother");
    let mut kalman = store.snapshot().kalman;
    kalman.use_coupled_xy = true;
    store.update_kalman(kalman);
    thread::sleep(Duration::from_secs(1));

    producing.store(false, Ordering::Release);
    let _ = producer.join();
    controller.stop();

    let status = controller.status();
    println!("Frames processed:   {}", status.frames_processed);
    println!("Frames skipped:     {}", status.frames_skipped);
    println!("Commands sent:      {}", status.commands_sent);
    println!("Dead-zone drops:    {}", status.commands_suppressed);
    println!("Rate-limited:       {}", status.rate_limited);
    println!("Output disabled:    {}", status.output_disabled);
    println!("Net motion:         {:?}", stub.total_motion());

    let times = stub.move_times();
    if let (Some(first), Some(last)) = (times.first(), times.last()) {
        let secs = last.duration_since(*first).as_secs_f32().max(f32::EPSILON);
        println!("Command rate:       {:.1} Hz", times.len() as f32 / secs);
    }

    let mut quick = QuickMove::new(actuator, &store.snapshot());
    let path = quick.plan(Point::origin(), Point::new(90.0, -30.0));
    println!("Quick move ({}) path: {:?}", quick.curve(), path);
    let report = quick.move_by(90.0, -30.0, &AtomicBool::new(true));
    println!("Quick move sent {} steps, moved {:?}", report.steps_sent, report.moved);

    Ok(())
}

fn jittered_box(rng: &mut StdRng, cx: f32, cy: f32, w: f32, h: f32, conf: f32) -> Detection {
    let jx = rng.gen_range(-1.5..1.5);
    let jy = rng.gen_range(-1.5..1.5);
    Detection::new(
        Bbox::new(
            cx - w / 2.0 + jx,
            cy - h / 2.0 + jy,
            cx + w / 2.0 + jx,
            cy + h / 2.0 + jy,
        ),
        conf + rng.gen_range(-0.05..0.05),
        "target",
    )
}

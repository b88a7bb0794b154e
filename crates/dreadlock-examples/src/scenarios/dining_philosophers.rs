use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dreadlock::{Dreadlock, LockError, Registry};
use tracing::info;

use super::{join_named, spawn_named};

const PHILOSOPHERS: usize = 5;
const FORKS: [&str; PHILOSOPHERS] = [
    "demo.fork.0",
    "demo.fork.1",
    "demo.fork.2",
    "demo.fork.3",
    "demo.fork.4",
];

/// Five philosophers, each taking the lower-numbered of their two forks
/// first. Every reported deadlock makes the philosopher put down what they
/// hold and try again.
pub fn run(registry: &Registry, meals: u32) -> Result<(), String> {
    let forks: Arc<Vec<Dreadlock>> = Arc::new(
        FORKS
            .into_iter()
            .map(|name| Dreadlock::new(name, registry))
            .collect(),
    );
    let detections = Arc::new(AtomicUsize::new(0));

    let mut philosophers = Vec::with_capacity(PHILOSOPHERS);
    for i in 0..PHILOSOPHERS {
        let forks = Arc::clone(&forks);
        let detections = Arc::clone(&detections);
        let name = format!("philosopher.{i}");
        let handle = spawn_named(&name, move || dine(i, &forks, meals, &detections))?;
        philosophers.push((name, handle));
    }
    for (name, handle) in philosophers {
        join_named(&name, handle)?.map_err(|e| format!("{name}: {e}"))?;
    }

    println!(
        "{PHILOSOPHERS} philosophers ate {meals} meals each; {} deadlock reports along the way",
        detections.load(Ordering::Relaxed)
    );
    Ok(())
}

fn dine(
    i: usize,
    forks: &[Dreadlock],
    meals: u32,
    detections: &AtomicUsize,
) -> Result<(), LockError> {
    let low = i.min((i + 1) % PHILOSOPHERS);
    let high = i.max((i + 1) % PHILOSOPHERS);
    let mut eaten = 0;
    while eaten < meals {
        if let Err(deadlock) = forks[low].lock() {
            detections.fetch_add(1, Ordering::Relaxed);
            println!("philosopher {i}: {deadlock}");
            continue;
        }
        match forks[high].lock() {
            Ok(()) => {
                std::thread::sleep(Duration::from_millis(200));
                eaten += 1;
                info!(philosopher = i, eaten, "meal finished");
                forks[high].unlock()?;
            }
            Err(deadlock) => {
                detections.fetch_add(1, Ordering::Relaxed);
                println!("philosopher {i}: {deadlock}");
            }
        }
        forks[low].unlock()?;
        std::thread::sleep(Duration::from_millis(10 * (i as u64 + 1)));
    }
    Ok(())
}

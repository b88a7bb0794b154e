use std::sync::Arc;
use std::time::Duration;

use dreadlock::{Dreadlock, Registry};

use super::{join_named, spawn_named};

pub fn run(registry: &Registry) -> Result<(), String> {
    let lock = Arc::new(Dreadlock::new("demo.solo", registry));

    for _ in 0..100 {
        lock.lock().map_err(|e| e.to_string())?;
        lock.unlock().map_err(|e| e.to_string())?;
    }
    println!("main thread locked and unlocked demo.solo 100 times");

    let worker = spawn_named("solo.worker", {
        let lock = Arc::clone(&lock);
        move || -> Result<(), String> {
            for _ in 0..1000 {
                lock.lock().map_err(|e| e.to_string())?;
                std::thread::sleep(Duration::from_millis(1));
                lock.unlock().map_err(|e| e.to_string())?;
            }
            Ok(())
        }
    })?;
    join_named("solo.worker", worker)??;
    println!("solo.worker locked and unlocked demo.solo 1000 times");
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use dreadlock::{Dreadlock, Registry};

use super::{join_named, spawn_named};

fn churn(lock: &Dreadlock, rounds: usize) -> Result<(), String> {
    for _ in 0..rounds {
        lock.lock().map_err(|e| e.to_string())?;
        std::thread::sleep(Duration::from_millis(1));
        lock.unlock().map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub fn run_without_deadlock(registry: &Registry) -> Result<(), String> {
    let lock = Arc::new(Dreadlock::new("demo.shared", registry));

    let workers = ["worker.alpha", "worker.beta"]
        .into_iter()
        .map(|name| {
            let lock = Arc::clone(&lock);
            spawn_named(name, move || churn(&lock, 1000)).map(|handle| (name, handle))
        })
        .collect::<Result<Vec<_>, _>>()?;
    for (name, handle) in workers {
        join_named(name, handle)??;
    }
    println!("two workers shared demo.shared 2000 times without a deadlock report");
    Ok(())
}

pub fn run_with_deadlock(registry: &Registry) -> Result<(), String> {
    let lock = Arc::new(Dreadlock::new("demo.shared", registry));

    let relocker = spawn_named("worker.relocker", {
        let lock = Arc::clone(&lock);
        move || -> Result<(), String> {
            churn(&lock, 100)?;
            lock.lock().map_err(|e| e.to_string())?;
            println!("worker.relocker holds demo.shared and locks it again");
            let outcome = match lock.lock() {
                Ok(()) => Err("relocking a held lock was not reported".to_owned()),
                Err(deadlock) => {
                    println!("{deadlock}");
                    Ok(())
                }
            };
            lock.unlock().map_err(|e| e.to_string())?;
            outcome
        }
    })?;
    let churner = spawn_named("worker.churner", {
        let lock = Arc::clone(&lock);
        move || churn(&lock, 100)
    })?;

    join_named("worker.relocker", relocker)??;
    join_named("worker.churner", churner)??;
    Ok(())
}

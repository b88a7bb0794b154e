use std::sync::Arc;
use std::time::Duration;

use dreadlock::{Dreadlock, Registry};

use super::{join_named, spawn_named};

fn churn(lock: Arc<Dreadlock>) -> Result<(), String> {
    for _ in 0..1000 {
        lock.lock().map_err(|e| e.to_string())?;
        std::thread::sleep(Duration::from_millis(1));
        lock.unlock().map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub fn run(registry: &Registry) -> Result<(), String> {
    let left = Arc::new(Dreadlock::new("demo.left", registry));
    let right = Arc::new(Dreadlock::new("demo.right", registry));

    let alpha = spawn_named("worker.alpha", {
        let left = Arc::clone(&left);
        move || churn(left)
    })?;
    let beta = spawn_named("worker.beta", {
        let right = Arc::clone(&right);
        move || churn(right)
    })?;

    join_named("worker.alpha", alpha)??;
    join_named("worker.beta", beta)??;
    println!("two workers on separate locks finished without a deadlock report");
    Ok(())
}

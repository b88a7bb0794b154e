use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use dreadlock::{Dreadlock, Registry};

use super::{join_named, spawn_named};

/// Main holds `right`; the worker takes `left` and blocks on `right`; main
/// then asks for `left`, closing the cycle.
pub fn run(registry: &Registry) -> Result<(), String> {
    let left = Arc::new(Dreadlock::new("demo.chain.left", registry));
    let right = Arc::new(Dreadlock::new("demo.chain.right", registry));

    right.lock().map_err(|e| e.to_string())?;
    println!("main holds demo.chain.right");

    let (holding_tx, holding_rx) = mpsc::channel();
    let worker = spawn_named("worker.chain", {
        let left = Arc::clone(&left);
        let right = Arc::clone(&right);
        move || -> Result<(), String> {
            left.lock().map_err(|e| e.to_string())?;
            holding_tx
                .send(())
                .map_err(|_| "main stopped listening for worker.chain".to_owned())?;
            println!("worker.chain holds demo.chain.left; waiting for demo.chain.right");
            match right.lock() {
                Ok(()) => {
                    println!("worker.chain got demo.chain.right after the cycle was broken");
                    right.unlock().map_err(|e| e.to_string())?;
                }
                // both sides of the cycle may notice it
                Err(deadlock) => println!("{deadlock}; releasing demo.chain.left"),
            }
            left.unlock().map_err(|e| e.to_string())?;
            Ok(())
        }
    })?;

    holding_rx
        .recv()
        .map_err(|_| "worker.chain exited before taking demo.chain.left".to_owned())?;
    std::thread::sleep(Duration::from_millis(500));

    println!("main attempting demo.chain.left; this closes a two-lock cycle");
    match left.lock() {
        Ok(()) => {
            println!("worker.chain broke the cycle first; main got demo.chain.left");
            left.unlock().map_err(|e| e.to_string())?;
        }
        Err(deadlock) => println!("{deadlock}; releasing demo.chain.right"),
    }
    right.unlock().map_err(|e| e.to_string())?;

    join_named("worker.chain", worker)??;
    Ok(())
}

#![cfg(test)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use crate::kernel::error::ErrorKind;
use crate::plugin_system::plugin::PluginState;
use crate::plugin_system::scheduler::RunFunction;
use crate::plugin_system::traits::InstanceData;
use crate::tests::integration::common::{instance_context, new_journal, plugin, TestRuntime, TestWorld};

/// Runtime registering a function that runs `rounds` times
fn counting(name: &str, journal: &crate::tests::integration::common::Journal, counter: &Arc<AtomicUsize>, rounds: usize) -> TestRuntime {
    let counter = Arc::clone(counter);
    TestRuntime::new(name, journal).on_start(move |ctx| {
        let counter = Arc::clone(&counter);
        ctx.register_run_function(move |_| counter.fetch_add(1, Ordering::SeqCst) + 1 < rounds)
            .map_err(|e| e.to_string())
    })
}

#[test]
fn test_run_plugins_until_done() {
    let journal = new_journal();
    let counter = Arc::new(AtomicUsize::new(0));
    let world = TestWorld::new(&journal, vec![counting("worker", &journal, &counter, 3)]);
    world.install(plugin("worker"));
    world.ctx.start_plugin("worker").unwrap();

    world.ctx.run_plugins();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(!world.ctx.run_plugins_step());
}

#[test]
fn test_run_functions_are_interleaved_fairly() {
    let journal = new_journal();
    let order = Arc::new(Mutex::new(Vec::new()));
    let make = |name: &'static str| {
        let order = Arc::clone(&order);
        TestRuntime::new(name, &journal).on_start(move |ctx| {
            let order = Arc::clone(&order);
            let runs = AtomicUsize::new(0);
            ctx.register_run_function(move |_| {
                order.lock().unwrap().push(name);
                runs.fetch_add(1, Ordering::SeqCst) + 1 < 2
            })
            .map_err(|e| e.to_string())
        })
    };
    let world = TestWorld::new(&journal, vec![make("left"), make("right")]);
    world.install(plugin("left"));
    world.install(plugin("right"));
    world.ctx.start_plugin("left").unwrap();
    world.ctx.start_plugin("right").unwrap();

    world.ctx.run_plugins();
    assert_eq!(*order.lock().unwrap(), vec!["left", "right", "left", "right"]);
}

#[test]
fn test_registering_same_function_twice_queues_it_once() {
    let journal = new_journal();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);
    let func: RunFunction = Arc::new(move |_: &InstanceData| {
        seen.fetch_add(1, Ordering::SeqCst);
        false
    });
    let runtime = TestRuntime::new("worker", &journal).on_start(move |ctx| {
        ctx.register_run_function_arc(Arc::clone(&func)).map_err(|e| e.to_string())?;
        ctx.register_run_function_arc(Arc::clone(&func)).map_err(|e| e.to_string())
    });
    let world = TestWorld::new(&journal, vec![runtime]);
    world.install(plugin("worker"));
    world.ctx.start_plugin("worker").unwrap();

    world.ctx.run_plugins();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stopping_drops_queued_functions() {
    let journal = new_journal();
    let counter = Arc::new(AtomicUsize::new(0));
    let world = TestWorld::new(&journal, vec![counting("worker", &journal, &counter, usize::MAX)]);
    world.install(plugin("worker"));
    world.ctx.start_plugin("worker").unwrap();

    assert!(world.ctx.run_plugins_step());
    assert!(world.ctx.run_plugins_step());
    world.ctx.stop_plugin("worker").unwrap();

    assert!(!world.ctx.run_plugins_step());
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_panicking_run_function_is_not_requeued() {
    let journal = new_journal();
    let runtime = TestRuntime::new("worker", &journal).on_start(|ctx| {
        ctx.register_run_function(|_| panic!("run function failure"))
            .map_err(|e| e.to_string())
    });
    let world = TestWorld::new(&journal, vec![runtime]);
    world.install(plugin("worker"));
    world.ctx.start_plugin("worker").unwrap();

    assert!(!world.ctx.run_plugins_step());
    assert_eq!(world.ctx.plugin_state("worker"), PluginState::Active);
}

#[test]
fn test_registration_requires_running_plugin() {
    let journal = new_journal();
    let captured = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    let runtime = TestRuntime::new("worker", &journal).on_start(move |ctx| {
        *slot.lock().unwrap() = Some(ctx.clone());
        Ok(())
    });
    let world = TestWorld::new(&journal, vec![runtime]);
    world.install(plugin("worker"));
    world.ctx.start_plugin("worker").unwrap();
    world.ctx.stop_plugin("worker").unwrap();

    let ctx = captured.lock().unwrap().clone().unwrap();
    let err = ctx.register_run_function(|_| false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
}

#[test]
#[should_panic(expected = "plugin context")]
fn test_main_program_cannot_register_run_functions() {
    let journal = new_journal();
    let world = TestWorld::new(&journal, vec![]);
    let _ = world.ctx.register_run_function(|_| false);
}

#[test]
fn test_stop_waits_for_running_function() {
    let journal = new_journal();
    let entered = Arc::new(Barrier::new(2));
    let in_function = Arc::clone(&entered);
    let sink = Arc::clone(&journal);
    let runtime = TestRuntime::new("worker", &journal).on_start(move |ctx| {
        let in_function = Arc::clone(&in_function);
        let sink = Arc::clone(&sink);
        ctx.register_run_function(move |_| {
            in_function.wait();
            thread::sleep(Duration::from_millis(200));
            sink.lock().unwrap().push("run-end".to_string());
            true
        })
        .map_err(|e| e.to_string())
    });
    let world = TestWorld::new(&journal, vec![runtime]);
    world.install(plugin("worker"));
    world.ctx.start_plugin("worker").unwrap();

    let ctx = world.ctx.clone();
    let runner = thread::spawn(move || ctx.run_plugins_step());
    entered.wait();
    world.ctx.stop_plugin("worker").unwrap();

    // the function asked to run again but its plugin was being stopped
    let more = runner.join().expect("runner thread");
    assert!(!more);
    assert_eq!(world.journal(), vec!["create:worker", "start:worker", "run-end", "stop:worker"]);
    assert_eq!(world.ctx.plugin_state("worker"), PluginState::Resolved);
}

#[test]
fn test_stopping_own_plugin_from_run_function_is_fatal() {
    let journal = new_journal();
    let failure = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&failure);
    let runtime = TestRuntime::new("worker", &journal).on_start(move |ctx| {
        let slot = Arc::clone(&slot);
        ctx.register_run_function(move |instance| {
            let ctx = instance_context(instance);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| ctx.stop_plugin("worker")));
            if let Err(payload) = outcome {
                *slot.lock().unwrap() = payload.downcast_ref::<String>().cloned();
            }
            false
        })
        .map_err(|e| e.to_string())
    });
    let world = TestWorld::new(&journal, vec![runtime]);
    world.install(plugin("worker"));
    world.ctx.start_plugin("worker").unwrap();

    assert!(!world.ctx.run_plugins_step());
    let message = failure.lock().unwrap().clone().expect("fatal error raised");
    assert!(message.contains("stopped from within its own run function"), "{}", message);
    assert!(!world.journal().contains(&"stop:worker".to_string()));
}

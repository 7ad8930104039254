// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::rc::Rc;

use mesh_engine::events::repeated::Repeated;
use mesh_engine::run_simulation;
use mesh_engine::test_helpers::start_test;
use mesh_engine::traits::Event;

#[test]
fn notify_one_listener_result() {
    let mut engine = start_test(file!());
    let clock = engine.clock();

    let repeated = Repeated::new(0_usize);

    {
        let repeated = repeated.clone();
        let clock = clock.clone();
        engine.spawn(async move {
            let res = repeated.listen().await;
            assert_eq!(res, 42);

            // Ensure this hasn't completed early
            assert_eq!(clock.tick_now().tick(), 10);
            Ok(())
        });
    }

    {
        let clock = clock.clone();
        engine.spawn(async move {
            clock.wait_ticks(10).await;
            repeated.notify_result(42)?;
            Ok(())
        });
    }

    run_simulation!(engine);
    assert_eq!(clock.tick_now().tick(), 10);
}

#[test]
fn notify_before_listen_is_lost() {
    let mut engine = start_test(file!());
    let clock = engine.clock();

    let repeated = Repeated::default();
    let woken = Rc::new(RefCell::new(false));

    {
        let repeated = repeated.clone();
        let clock = clock.clone();
        let woken = woken.clone();
        engine.spawn(async move {
            clock.wait_ticks(10).await;
            repeated.listen().await;
            *woken.borrow_mut() = true;
            Ok(())
        });
    }

    engine.spawn(async move {
        repeated.notify()?;
        Ok(())
    });

    run_simulation!(engine);
    assert!(!*woken.borrow());
    assert_eq!(clock.tick_now().tick(), 10);
}

#[test]
fn condition_loop_sees_every_change() {
    let mut engine = start_test(file!());
    let clock = engine.clock();

    let changed = Repeated::default();
    let level = Rc::new(RefCell::new(0));

    {
        let changed = changed.clone();
        let level = level.clone();
        let clock = clock.clone();
        engine.spawn(async move {
            while *level.borrow() < 3 {
                changed.listen().await;
            }
            assert_eq!(clock.tick_now().tick(), 3);
            Ok(())
        });
    }

    {
        let level = level.clone();
        engine.spawn(async move {
            for _ in 0..3 {
                clock.wait_ticks(1).await;
                *level.borrow_mut() += 1;
                changed.notify()?;
            }
            Ok(())
        });
    }

    run_simulation!(engine);
    assert_eq!(*level.borrow(), 3);
}

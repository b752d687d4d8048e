use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{bounded, unbounded};
use ntest::timeout;
use pretty_assertions::assert_eq;
use tether::executor::{self, Client, Executor};
use tether::Error;

#[test]
#[should_panic(expected = "request channel must be unbuffered")]
fn test_buffered_request_channel_panics() {
    let (_requests_tx, requests_rx) = bounded::<u64>(1);
    let (replies_tx, _replies_rx) = bounded::<u64>(0);

    Executor::new(requests_rx, replies_tx);
}

#[test]
#[should_panic(expected = "reply channel must be unbuffered")]
fn test_buffered_reply_channel_panics() {
    let (_requests_tx, requests_rx) = bounded::<u64>(0);
    let (replies_tx, _replies_rx) = bounded::<u64>(16);

    Executor::new(requests_rx, replies_tx);
}

#[test]
#[should_panic(expected = "request channel must be unbuffered")]
fn test_unbounded_channel_panics() {
    let (_requests_tx, requests_rx) = unbounded::<u64>();
    let (replies_tx, _replies_rx) = bounded::<u64>(0);

    Executor::new(requests_rx, replies_tx);
}

#[test]
#[timeout(10000)]
fn test_replies_return_to_their_caller() -> Result<()> {
    const CALLERS: u64 = 32;
    const CALLS: u64 = 500;

    let (client, executor) = executor::rendezvous::<u64, u64>();
    let worker = thread::spawn(move || executor.run(|marker| marker.wrapping_mul(3)));

    let client = Arc::new(client);
    let mut callers = vec![];

    for caller in 0..CALLERS {
        let client = Arc::clone(&client);

        callers.push(thread::spawn(move || -> Result<()> {
            for call in 0..CALLS {
                let marker = (caller << 32) | call;
                let reply = client.call(marker)?;
                assert_eq!(reply, marker.wrapping_mul(3));
            }
            Ok(())
        }));
    }

    for caller in callers {
        caller.join().unwrap()?;
    }

    drop(client);
    worker.join().unwrap();

    Ok(())
}

#[test]
#[timeout(10000)]
fn test_requests_never_overlap() -> Result<()> {
    let spans = Arc::new(Mutex::new(vec![]));

    let (client, executor) = executor::rendezvous::<u32, u32>();
    let worker = {
        let spans = Arc::clone(&spans);

        thread::spawn(move || {
            executor.run(|id| {
                let start = Instant::now();
                thread::sleep(Duration::from_millis(2));
                spans.lock().unwrap().push((start, Instant::now()));
                id
            })
        })
    };

    let client = Arc::new(client);
    let callers: Vec<_> = (0..8)
        .map(|id| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for _ in 0..10 {
                    assert_eq!(client.call(id).unwrap(), id);
                }
            })
        })
        .collect();

    for caller in callers {
        caller.join().unwrap();
    }

    drop(client);
    worker.join().unwrap();

    let mut spans = spans.lock().unwrap().clone();
    assert_eq!(spans.len(), 80);

    spans.sort();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlapping requests: {:?}", pair);
    }

    Ok(())
}

#[test]
#[timeout(2000)]
fn test_call_after_executor_exits() {
    let (client, executor) = executor::rendezvous::<u8, u8>();
    drop(executor);

    assert!(matches!(client.call(1), Err(Error::Terminated)));
}

#[test]
#[timeout(2000)]
fn test_executor_panic_disconnects_caller() {
    let (client, executor): (Client<u8, u8>, _) = executor::rendezvous();

    let worker = thread::spawn(move || {
        executor.run(|request| {
            if request == 0 {
                panic!("fatal request");
            }
            request
        })
    });

    assert_eq!(client.call(7).unwrap(), 7);
    assert!(matches!(client.call(0), Err(Error::Terminated)));
    assert!(matches!(client.call(7), Err(Error::Terminated)));

    assert!(worker.join().is_err());
}

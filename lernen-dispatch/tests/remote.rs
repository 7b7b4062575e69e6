//! End-to-end tests against a real dispatcher server on a loopback socket.

use std::time::Duration;

use lernen::prelude::*;
use lernen_dispatch::{wire::Opcode, RemoteFactory, Server};

const TIMEOUT: Duration = Duration::from_secs(5);

fn connect() -> RemoteFactory {
    let (addr, _handle) = Server::spawn("127.0.0.1:0").expect("failed to spawn server");
    RemoteFactory::connect(addr, TIMEOUT).expect("failed to connect")
}

fn target(word: &Word) -> bool {
    word.len() % 3 == 0
}

/// All words over `{0, 1}` up to the given length.
fn words_up_to(length: usize) -> Vec<Word> {
    let mut out = vec![Word::empty()];
    let mut frontier = vec![Word::empty()];
    for _ in 0..length {
        let mut next = Vec::new();
        for w in &frontier {
            for sym in 0..2 {
                let ext = w.extended(sym);
                out.push(ext.clone());
                next.push(ext);
            }
        }
        frontier = next;
    }
    out
}

#[test_log::test]
fn remote_knowledgebase_matches_local_semantics() {
    let factory = connect();
    let remote = factory.create_knowledgebase().unwrap();
    let local = LocalFactory::new().create_knowledgebase().unwrap();

    let words = [
        Word::empty(),
        Word::from([0]),
        Word::from([1, 0]),
        Word::from([1, 1, 1]),
    ];
    for (i, word) in words.iter().enumerate() {
        for kb in [&remote as &dyn Knowledgebase, &local] {
            kb.add_knowledge(word, i % 2 == 0).unwrap();
        }
    }
    let pending = Word::from([0, 0, 0, 0]);
    assert_eq!(
        remote.resolve_or_add_query(&pending).unwrap(),
        local.resolve_or_add_query(&pending).unwrap()
    );

    for word in &words {
        assert_eq!(
            remote.resolve_or_add_query(word).unwrap(),
            local.resolve_or_add_query(word).unwrap()
        );
    }
    assert_eq!(remote.get_queries().unwrap(), local.get_queries().unwrap());

    // identical contents serialize to identical buffers on both sides
    assert_eq!(remote.serialize().unwrap(), local.serialize().unwrap());

    remote.clear().unwrap();
    assert!(remote.get_queries().unwrap().is_empty());
    assert_eq!(
        remote.resolve_or_add_query(&words[0]).unwrap(),
        Knowledge::Pending
    );
}

#[test_log::test]
fn serialized_state_travels_between_local_and_remote() {
    let factory = connect();
    let remote = factory.create_knowledgebase().unwrap();

    let local = LocalFactory::new().create_knowledgebase().unwrap();
    local.add_knowledge(&Word::from([0, 1]), true).unwrap();
    local.add_knowledge(&Word::from([1]), false).unwrap();

    remote.deserialize(&local.serialize().unwrap()).unwrap();
    assert_eq!(
        remote.resolve_or_add_query(&Word::from([0, 1])).unwrap(),
        Knowledge::Accept
    );
    assert_eq!(
        remote.resolve_or_add_query(&Word::from([1])).unwrap(),
        Knowledge::Reject
    );
}

#[test_log::test]
fn server_side_error_kinds_survive_the_wire() {
    let factory = connect();
    let kb = factory.create_knowledgebase().unwrap();

    // corrupt buffer: a format error, raised server-side
    assert!(matches!(
        kb.deserialize(b"definitely not a knowledgebase"),
        Err(Error::Format(_))
    ));

    // unbundled algorithm kind: an argument error, raised server-side
    assert!(matches!(
        factory.create_learning_algorithm(
            AlgorithmSpec::BiermannOriginal { alphabet_size: 2 },
            &kb
        ),
        Err(Error::Argument(_))
    ));

    // counterexample before any conjecture: an argument error as well
    let learner = factory
        .create_learning_algorithm(AlgorithmSpec::Angluin { alphabet_size: 2 }, &kb)
        .unwrap();
    assert!(matches!(
        learner.add_counterexample(&Word::from([0])),
        Err(Error::Argument(_))
    ));
}

#[test_log::test]
fn stale_handles_fail_with_protocol_errors() {
    let factory = connect();
    let connection = factory.connection();
    assert!(matches!(
        connection.call(Opcode::KbClear, 999, Vec::new()),
        Err(Error::Protocol(_))
    ));
    // the connection survives a protocol-level rejection of a single call
    assert!(factory.create_knowledgebase().is_ok());
}

#[test_log::test]
fn calls_after_close_fail_fast_with_connection_errors() {
    let factory = connect();
    let kb = factory.create_knowledgebase().unwrap();
    kb.add_knowledge(&Word::from([0]), true).unwrap();

    factory.close();

    let started = std::time::Instant::now();
    assert!(matches!(
        kb.add_knowledge(&Word::from([1]), true),
        Err(Error::Connection(_))
    ));
    assert!(matches!(kb.get_queries(), Err(Error::Connection(_))));
    assert!(matches!(
        factory.create_knowledgebase(),
        Err(Error::Connection(_))
    ));
    // fails fast, does not sit in a read timeout
    assert!(started.elapsed() < TIMEOUT);
}

#[test_log::test]
fn objects_are_scoped_to_their_connection() {
    let (addr, _handle) = Server::spawn("127.0.0.1:0").unwrap();
    let factory_a = RemoteFactory::connect(addr, TIMEOUT).unwrap();
    let factory_b = RemoteFactory::connect(addr, TIMEOUT).unwrap();

    let kb_a = factory_a.create_knowledgebase().unwrap();
    // binding a learner to a knowledgebase of another connection is refused
    assert!(matches!(
        factory_b.create_learning_algorithm(AlgorithmSpec::Angluin { alphabet_size: 2 }, &kb_a),
        Err(Error::Argument(_))
    ));

    // handle namespaces are independent, the first handle of connection b
    // does not alias kb_a
    let kb_b = factory_b.create_knowledgebase().unwrap();
    kb_a.add_knowledge(&Word::from([0]), true).unwrap();
    assert_eq!(
        kb_b.resolve_or_add_query(&Word::from([0])).unwrap(),
        Knowledge::Pending
    );
}

#[test_log::test]
fn remote_learning_converges_like_local_learning() {
    let factory = connect();
    let kb = factory.create_knowledgebase().unwrap();
    let learner = factory
        .create_learning_algorithm(AlgorithmSpec::Angluin { alphabet_size: 2 }, &kb)
        .unwrap();
    let logger = factory.create_logger().unwrap();
    learner.set_logger(&logger).unwrap();

    let mut accepted = None;
    for _ in 0..64 {
        match learner.advance().unwrap() {
            None => {
                for query in kb.get_queries().unwrap() {
                    kb.add_knowledge(&query, target(&query)).unwrap();
                }
            }
            Some(hypothesis) => {
                let dfa = Dfa::try_from(&hypothesis).unwrap();
                match words_up_to(7)
                    .into_iter()
                    .find(|w| dfa.accepts(w) != target(w))
                {
                    Some(counterexample) => {
                        learner.add_counterexample(&counterexample).unwrap()
                    }
                    None => {
                        accepted = Some(dfa);
                        break;
                    }
                }
            }
        }
    }

    let dfa = accepted.expect("remote learning did not converge");
    assert_eq!(dfa.size(), 3);
    for w in words_up_to(9) {
        assert_eq!(dfa.accepts(&w), target(&w), "disagreement on {w}");
    }

    let transcript = logger.receive_and_flush().unwrap();
    assert!(transcript.contains("conjectured hypothesis"));
    assert!(transcript.contains("counterexample"));

    // detaching keeps entries buffered server-side until the next drain
    learner.advance().unwrap();
    learner.remove_logger().unwrap();
    assert!(!logger.receive_and_flush().unwrap().is_empty());
}

//! Integration tests for document sessions exchanging requests through their
//! event channels.

use ot_engine::{Operation, StateVector, TextBuffer, UserId, WireRequest};
use ot_session::{replay, DocumentSession, Scenario, SessionConfig, SessionEvent};
use tokio::sync::broadcast;

struct Peer {
    user: UserId,
    session: DocumentSession<TextBuffer>,
    events: broadcast::Receiver<SessionEvent>,
}

fn peers(text: &str, count: u64) -> Vec<Peer> {
    (1..=count)
        .map(|id| {
            let user = UserId(id);
            let mut session = DocumentSession::new(TextBuffer::from(text), SessionConfig::default());
            for other in (1..=count).filter(|other| *other != id) {
                session.add_user(UserId(other), StateVector::new()).unwrap();
            }
            let events = session.subscribe();
            Peer {
                user,
                session,
                events,
            }
        })
        .collect()
}

/// Forward every outgoing request to every other peer until the network is quiet.
fn relay(peers: &mut [Peer], wire: bool) {
    loop {
        let mut outgoing = Vec::new();
        for peer in peers.iter_mut() {
            while let Ok(event) = peer.events.try_recv() {
                if let SessionEvent::Outgoing(request) = event {
                    outgoing.push(request);
                }
            }
        }
        if outgoing.is_empty() {
            return;
        }

        for request in outgoing {
            for peer in peers.iter_mut().filter(|peer| peer.user != request.user) {
                if wire {
                    let data = WireRequest::encode(&request).unwrap();
                    peer.session.receive_wire(&data).unwrap();
                } else {
                    peer.session.receive(request.clone()).unwrap();
                }
            }
        }
    }
}

fn assert_converged(peers: &[Peer], expected: &str) {
    for peer in peers {
        assert_eq!(peer.session.buffer().text(), expected, "text at {}", peer.user);
        assert_eq!(peer.session.current(), peers[0].session.current());
        assert_eq!(peer.session.pending_len(), 0);
    }
}

#[test]
fn test_three_sessions_converge() {
    let mut peers = peers("abc", 3);

    peers[0].session.local_edit(UserId(1), Operation::insert(0, ">")).unwrap();
    peers[1].session.local_edit(UserId(2), Operation::delete(1, 1)).unwrap();
    peers[2].session.local_edit(UserId(3), Operation::insert(3, "!")).unwrap();

    relay(&mut peers, false);
    assert_converged(&peers, ">ac!");
}

#[test]
fn test_sessions_converge_over_wire() {
    let mut peers = peers("abc", 3);

    peers[0].session.local_edit(UserId(1), Operation::insert(0, ">")).unwrap();
    peers[1].session.local_edit(UserId(2), Operation::delete(1, 1)).unwrap();
    peers[2].session.local_edit(UserId(3), Operation::insert(3, "!")).unwrap();

    relay(&mut peers, true);
    assert_converged(&peers, ">ac!");
}

#[test]
fn test_undo_propagates_to_peers() {
    let mut peers = peers("abc", 2);

    peers[0].session.local_edit(UserId(1), Operation::insert(0, "X")).unwrap();
    relay(&mut peers, false);
    assert_converged(&peers, "Xabc");

    peers[1].session.local_edit(UserId(2), Operation::insert(4, "Y")).unwrap();
    peers[0].session.undo(UserId(1)).unwrap();
    relay(&mut peers, false);
    assert_converged(&peers, "abcY");

    assert!(peers[0].session.has_redo(UserId(1)));
    assert!(!peers[1].session.has_undo(UserId(1)));
}

#[tokio::test]
async fn test_subscriber_sees_applied_remote_edits() {
    let mut peers = peers("", 2);
    let mut watcher = peers[1].session.subscribe();

    peers[0].session.local_edit(UserId(1), Operation::insert(0, "hi")).unwrap();
    relay(&mut peers, false);

    assert_eq!(
        watcher.recv().await.unwrap(),
        SessionEvent::Applied {
            user: UserId(1),
            seq: 1,
            operation: Operation::insert(0, "hi"),
        }
    );
}

#[test]
fn test_replay_bundled_scenario() {
    let scenario: Scenario =
        serde_json::from_str(include_str!("../scenarios/concurrent_undo.json")).unwrap();

    let report = replay::run(&scenario, &SessionConfig::default()).unwrap();
    assert_eq!(report.sites.len(), 3);
    assert!(report.converged(), "{:?}", report);
}

mod common;

use common::{
    mock_candidate, next_matching, wait_calls, wait_room_size, wait_snapshot_state, wait_state,
    Call, MockEngine,
};
use ssc_call::peer::{
    CloseReason, DataChannelState, MediaTrack, NegotiationState, Role, SdpType, TrackKind,
};
use ssc_call::signaling::relay::Relay;
use ssc_call::signaling::{SignalingEvent, SignalingLink, SignalingMessage};
use ssc_call::{Error, MisuseError, Session, SessionConfig, SessionEvent, SessionHandle};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Party {
    handle: SessionHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    engine: Arc<MockEngine>,
}

async fn join(relay: &Relay, engine: Arc<MockEngine>, room: &str) -> Party {
    let (_, link) = relay.connect().await;
    let (handle, events) = Session::join(SessionConfig::new(room), link, engine.clone()).unwrap();
    Party {
        handle,
        events,
        engine,
    }
}

/// A в комнате первым, B заходит следом; оба доходят до Stable
async fn stable_call(relay: &Relay, room: &str) -> (Party, Party) {
    let (engine_a, engine_b) = MockEngine::pair();
    let mut a = join(relay, engine_a, room).await;
    wait_room_size(relay, room, 1).await;
    let mut b = join(relay, engine_b, room).await;

    wait_state(&mut a.events, NegotiationState::Stable).await;
    wait_state(&mut b.events, NegotiationState::Stable).await;
    (a, b)
}

#[tokio::test]
async fn first_participant_waits_then_offers_to_the_second() {
    let relay = Relay::new();
    let (engine_a, engine_b) = MockEngine::pair();

    let mut a = join(&relay, engine_a, "42").await;
    wait_room_size(&relay, "42", 1).await;
    let snapshot = a.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, NegotiationState::Idle);
    assert_eq!(snapshot.role, Role::Undetermined);
    assert!(snapshot.link.is_none());

    let mut b = join(&relay, engine_b, "42").await;
    wait_state(&mut a.events, NegotiationState::Stable).await;
    wait_state(&mut b.events, NegotiationState::Stable).await;

    let a_snapshot = a.handle.snapshot().await.unwrap();
    let b_snapshot = b.handle.snapshot().await.unwrap();
    assert_eq!(a_snapshot.role, Role::Initiator);
    assert_eq!(b_snapshot.role, Role::Responder);

    let a_calls = a.engine.calls();
    let offer_applied = a_calls
        .iter()
        .position(|c| *c == Call::SetLocal(SdpType::Offer))
        .unwrap();
    let answer_applied = a_calls
        .iter()
        .position(|c| *c == Call::SetRemote(SdpType::Answer))
        .unwrap();
    assert!(offer_applied < answer_applied);

    let b_calls = b.engine.calls();
    assert!(!b_calls.contains(&Call::CreateOffer));
    let offer_received = b_calls
        .iter()
        .position(|c| *c == Call::SetRemote(SdpType::Offer))
        .unwrap();
    let answer_created = b_calls.iter().position(|c| *c == Call::CreateAnswer).unwrap();
    assert!(offer_received < answer_created);
}

#[tokio::test]
async fn screen_share_renegotiates_on_the_same_link() {
    let relay = Relay::new();
    let (mut a, mut b) = stable_call(&relay, "42").await;
    let link_before = a.handle.snapshot().await.unwrap().link;

    a.handle
        .set_local_tracks(vec![MediaTrack::screen("screen")])
        .await
        .unwrap();
    wait_state(&mut a.events, NegotiationState::Renegotiating).await;

    let added = next_matching(&mut b.events, "remote screen track", |e| {
        matches!(e, SessionEvent::RemoteTrackAdded(_))
    })
    .await;
    let SessionEvent::RemoteTrackAdded(track) = added else {
        unreachable!()
    };
    assert_eq!(track.id, "screen");
    assert_eq!(track.kind, TrackKind::Video);

    wait_state(&mut b.events, NegotiationState::Stable).await;
    wait_state(&mut a.events, NegotiationState::Stable).await;

    let snapshot = a.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.link, link_before);
    assert_eq!(snapshot.local_tracks, vec!["screen".to_string()]);
    assert_eq!(
        a.engine
            .calls()
            .iter()
            .filter(|c| **c == Call::CreateOffer)
            .count(),
        2
    );

    // остановка показа убирает трек у собеседника
    a.handle.remove_local_track("screen").await.unwrap();
    let removed = next_matching(&mut b.events, "remote track removal", |e| {
        matches!(e, SessionEvent::RemoteTrackRemoved { .. })
    })
    .await;
    assert_eq!(
        removed,
        SessionEvent::RemoteTrackRemoved {
            track_id: "screen".into()
        }
    );
}

fn count(calls: &[Call], call: Call) -> usize {
    calls.iter().filter(|c| **c == call).count()
}

async fn wait_remote_track(events: &mut mpsc::UnboundedReceiver<SessionEvent>, id: &str) {
    next_matching(events, &format!("remote track {id}"), |e| {
        matches!(e, SessionEvent::RemoteTrackAdded(t) if t.id == id)
    })
    .await;
}

#[tokio::test]
async fn simultaneous_track_changes_settle_on_one_offer_per_round() {
    let relay = Relay::new();
    let (mut a, mut b) = stable_call(&relay, "glare").await;
    let a_base = a.engine.calls().len();
    let b_base = b.engine.calls().len();

    let (on_a, on_b) = tokio::join!(
        a.handle.set_local_tracks(vec![MediaTrack::screen("a-screen")]),
        b.handle.set_local_tracks(vec![MediaTrack::camera("b-cam")]),
    );
    on_a.unwrap();
    on_b.unwrap();

    wait_remote_track(&mut a.events, "b-cam").await;
    wait_remote_track(&mut b.events, "a-screen").await;
    wait_calls(&b.engine, "answer to B's second offer", |calls| {
        count(&calls[b_base..], Call::SetRemote(SdpType::Answer)) == 1
    })
    .await;
    wait_snapshot_state(&a.handle, NegotiationState::Stable).await;
    wait_snapshot_state(&b.handle, NegotiationState::Stable).await;

    // A выигрывает: не откатывается и принимает только повторный offer B
    let a_log = a.engine.calls();
    let a_calls = &a_log[a_base..];
    assert_eq!(count(a_calls, Call::Rollback), 0);
    assert_eq!(count(a_calls, Call::CreateOffer), 1);
    assert_eq!(count(a_calls, Call::SetRemote(SdpType::Offer)), 1);
    assert_eq!(count(a_calls, Call::CreateAnswer), 1);

    // B уступает ровно один раз: откатом или отменой ещё не применённого offer'а
    let b_log = b.engine.calls();
    let b_calls = &b_log[b_base..];
    let cancelled = count(b_calls, Call::CreateOffer) - count(b_calls, Call::SetLocal(SdpType::Offer));
    assert_eq!(count(b_calls, Call::Rollback) + cancelled, 1);
    assert_eq!(count(b_calls, Call::CreateOffer), 2);
    assert_eq!(count(b_calls, Call::CreateAnswer), 1);

    assert_eq!(
        b.handle.snapshot().await.unwrap().local_tracks,
        vec!["b-cam".to_string()]
    );
}

#[tokio::test]
async fn ice_restart_renegotiates_the_same_link() {
    let relay = Relay::new();
    let (a, b) = stable_call(&relay, "ice").await;
    let link = a.handle.snapshot().await.unwrap().link;

    a.handle.restart_ice().await.unwrap();
    wait_calls(&b.engine, "second answer", |calls| {
        count(calls, Call::SetLocal(SdpType::Answer)) == 2
    })
    .await;
    wait_snapshot_state(&a.handle, NegotiationState::Stable).await;

    let calls = a.engine.calls();
    assert_eq!(count(&calls, Call::IceRestart), 1);
    assert_eq!(count(&calls, Call::CreateOffer), 2);
    assert_eq!(a.handle.snapshot().await.unwrap().link, link);
    assert_eq!(count(&b.engine.calls(), Call::IceRestart), 0);
}

#[tokio::test]
async fn channel_wanted_only_by_the_second_participant_gets_created() {
    let relay = Relay::new();
    let (engine_a, engine_b) = MockEngine::pair();
    let mut a = join(&relay, engine_a, "files").await;
    wait_room_size(&relay, "files", 1).await;
    let mut b = join(&relay, engine_b, "files").await;
    b.handle.open_data_channel("files").await.unwrap();

    let open = |e: &SessionEvent| {
        matches!(
            e,
            SessionEvent::DataChannelStateChanged {
                label,
                state: DataChannelState::Open,
            } if label == "files"
        )
    };
    next_matching(&mut b.events, "files open on B", open).await;
    next_matching(&mut a.events, "files open on A", open).await;
    wait_snapshot_state(&a.handle, NegotiationState::Stable).await;
    wait_snapshot_state(&b.handle, NegotiationState::Stable).await;

    assert_eq!(count(&b.engine.calls(), Call::CreateDataChannel("files".into())), 1);
    assert_eq!(count(&a.engine.calls(), Call::CreateDataChannel("files".into())), 0);

    b.handle.send_text("files", "report.pdf").await.unwrap();
    let received = next_matching(&mut a.events, "message on A", |e| {
        matches!(e, SessionEvent::DataChannelMessage { .. })
    })
    .await;
    assert_eq!(
        received,
        SessionEvent::DataChannelMessage {
            label: "files".into(),
            data: bytes::Bytes::from_static(b"report.pdf"),
        }
    );
}

#[tokio::test]
async fn candidates_before_the_answer_are_applied_after_it_in_order() {
    let relay = Relay::new();
    let (a, _b) = stable_call(&relay, "7").await;

    wait_calls(&a.engine, "three remote candidates", |calls| {
        calls
            .iter()
            .filter(|c| matches!(c, Call::AddCandidate(_)))
            .count()
            == 3
    })
    .await;

    let calls = a.engine.calls();
    let answer_applied = calls
        .iter()
        .position(|c| *c == Call::SetRemote(SdpType::Answer))
        .unwrap();
    let first_candidate = calls
        .iter()
        .position(|c| matches!(c, Call::AddCandidate(_)))
        .unwrap();
    assert!(answer_applied < first_candidate);

    let expected: Vec<String> = (1..=3).map(|n| mock_candidate("b", n).candidate).collect();
    assert_eq!(a.engine.candidates_applied(), expected);
}

#[tokio::test]
async fn data_channel_opened_before_the_peer_arrives() {
    let relay = Relay::new();
    let (engine_a, engine_b) = MockEngine::pair();
    let mut a = join(&relay, engine_a, "chat").await;
    a.handle.open_data_channel("ssc-data").await.unwrap();
    wait_room_size(&relay, "chat", 1).await;
    let mut b = join(&relay, engine_b, "chat").await;

    let open = |e: &SessionEvent| {
        matches!(
            e,
            SessionEvent::DataChannelStateChanged {
                state: DataChannelState::Open,
                ..
            }
        )
    };
    next_matching(&mut a.events, "channel open on A", open).await;
    next_matching(&mut b.events, "channel open on B", open).await;

    a.handle.send_text("ssc-data", "hello").await.unwrap();
    let received = next_matching(&mut b.events, "message on B", |e| {
        matches!(e, SessionEvent::DataChannelMessage { .. })
    })
    .await;
    assert_eq!(
        received,
        SessionEvent::DataChannelMessage {
            label: "ssc-data".into(),
            data: bytes::Bytes::from_static(b"hello"),
        }
    );

    let err = b.handle.send_text("other", "x").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Misuse(MisuseError::DataChannelNotOpen(_))
    ));
}

#[tokio::test]
async fn third_participant_gets_room_full_notice() {
    let relay = Relay::new();
    let (_a, _b) = stable_call(&relay, "42").await;

    let mut c = join(&relay, MockEngine::single(), "42").await;
    let notice = next_matching(&mut c.events, "relay notice", |e| {
        matches!(e, SessionEvent::RelayNotice(_))
    })
    .await;
    assert_eq!(notice, SessionEvent::RelayNotice("Room is full".into()));
    assert_eq!(
        c.handle.snapshot().await.unwrap().state,
        NegotiationState::Idle
    );
}

#[tokio::test]
async fn signaling_loss_while_awaiting_answer_closes_the_session() {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let link = SignalingLink {
        outbound: out_tx,
        inbound: in_rx,
    };
    let engine = MockEngine::single();
    let (handle, mut events) = Session::join(SessionConfig::new("42"), link, engine).unwrap();
    handle.open_data_channel("ssc-data").await.unwrap();

    in_tx.send(SignalingEvent::Connected).unwrap();
    assert!(matches!(
        out_rx.recv().await,
        Some(SignalingMessage::JoinRoom { .. })
    ));
    in_tx
        .send(SignalingEvent::Message(SignalingMessage::NewUserJoined))
        .unwrap();

    // кандидаты могут уйти раньше offer'а
    loop {
        match out_rx.recv().await {
            Some(SignalingMessage::Offer { room_id, .. }) => {
                assert_eq!(room_id.as_deref(), Some("42"));
                break;
            }
            Some(SignalingMessage::IceCandidate { .. }) => continue,
            other => panic!("unexpected {other:?}"),
        }
    }
    wait_state(&mut events, NegotiationState::AwaitingRemoteAnswer).await;

    in_tx.send(SignalingEvent::Disconnected).unwrap();
    let closed = next_matching(&mut events, "closed", |e| {
        matches!(e, SessionEvent::Closed { .. })
    })
    .await;
    assert_eq!(
        closed,
        SessionEvent::Closed {
            reason: CloseReason::SignalingLost
        }
    );

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, NegotiationState::Closed);
    let err = handle.send_text("ssc-data", "late").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Misuse(MisuseError::DataChannelNotOpen(_))
    ));
}

#[tokio::test]
async fn leave_frees_the_room_for_a_new_peer() {
    let relay = Relay::new();
    let (a, mut b) = stable_call(&relay, "5").await;

    a.handle.leave().await.unwrap();
    wait_room_size(&relay, "5", 1).await;
    assert!(matches!(
        a.handle.snapshot().await,
        Err(Error::SessionGone)
    ));
    wait_calls(&a.engine, "link closed", |calls| calls.contains(&Call::Close)).await;

    // новый участник: B становится инициатором на новом link
    let mut c = join(&relay, MockEngine::single(), "5").await;
    let restarted = next_matching(&mut b.events, "B restarts", |e| {
        matches!(e, SessionEvent::Closed { .. })
    })
    .await;
    assert_eq!(
        restarted,
        SessionEvent::Closed {
            reason: CloseReason::PeerRestarted
        }
    );
    wait_state(&mut b.events, NegotiationState::Stable).await;
    wait_state(&mut c.events, NegotiationState::Stable).await;
    assert_eq!(b.handle.snapshot().await.unwrap().role, Role::Initiator);
}

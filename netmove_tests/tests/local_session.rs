//! Host, owner and observer wired through in-process sessions.

use std::sync::{Arc, Mutex};

use netmove_shared::{
    config::MovementConfig,
    controller::{FrameOutcome, PlayerMovementController, Role},
    entity::{EntityId, Transform},
    math::{Vec2, Vec3},
    sample::MotionState,
    session::{LocalSessions, SessionService, TransportRole},
};
use netmove_tests::{init_tracing, ticking_frame};

#[tokio::test]
async fn session_flow_replicates_owner_motion_to_observer() -> anyhow::Result<()> {
    init_tracing();
    let cfg = MovementConfig::default();
    let dt = ticking_frame(&cfg);
    let sessions = LocalSessions::new(cfg);

    let created = sessions.create_session(3).await?;
    let host = sessions
        .start_transport(&created, TransportRole::Host)
        .await?;
    let mut requests = host.requests.expect("host receives requests");

    let joined = sessions.join_session(&created.join_code).await?;
    assert_eq!(joined, created);
    let owner_side = sessions
        .start_transport(&joined, TransportRole::Client)
        .await?;
    let watcher_side = sessions
        .start_transport(&sessions.join_session(&created.join_code).await?, TransportRole::Client)
        .await?;
    assert_eq!(sessions.player_count(&created.join_code), Some(3));
    assert!(sessions.join_session(&created.join_code).await.is_err());

    let entity = EntityId(1);
    let spawn = Transform::at(Vec3::new(2.0, 0.0, 0.0));
    let mut authority = PlayerMovementController::spawn(&host.context, entity, false, spawn);
    let mut owner = PlayerMovementController::spawn(&owner_side.context, entity, true, spawn);
    let mut observer = PlayerMovementController::spawn(&watcher_side.context, entity, false, spawn);
    assert_eq!(authority.role(), Role::Authority);
    assert_eq!(owner.role(), Role::OwnerClient);
    assert_eq!(observer.role(), Role::Observer);

    // stands in for the transport fan-out
    let wire: Arc<Mutex<Vec<MotionState>>> = Arc::default();
    let outbox = Arc::clone(&wire);
    authority.subscribe(move |_, next| outbox.lock().unwrap().push(next));

    for frame in 0..30 {
        let look = if frame < 15 { Vec2::new(0.2, 0.0) } else { Vec2::ZERO };
        owner.frame(dt, Vec2::new(0.0, 1.0), look);
        while let Ok((id, request)) = requests.try_recv() {
            assert_eq!(id, entity);
            authority.receive_request(request)?;
        }
        let delivered: Vec<MotionState> = wire.lock().unwrap().drain(..).collect();
        for state in delivered {
            observer.receive_replicated(state)?;
            owner.receive_replicated(state)?;
        }
        observer.frame(dt, Vec2::ZERO, Vec2::ZERO);
    }

    assert_eq!(owner.transform(), authority.transform());
    assert_eq!(observer.transform(), authority.transform());
    assert_eq!(owner.replicated(), authority.replicated());

    // owner stops: the last state is not moving, so the observer stays put
    owner.frame(dt, Vec2::ZERO, Vec2::ZERO);
    while let Ok((_, request)) = requests.try_recv() {
        let state = authority.receive_request(request)?;
        assert!(!state.is_moving);
    }
    for state in wire.lock().unwrap().drain(..) {
        observer.receive_replicated(state)?;
    }
    let before = observer.transform();
    assert!(matches!(
        observer.frame(dt, Vec2::ZERO, Vec2::ZERO),
        FrameOutcome::Idle(_)
    ));
    assert_eq!(observer.transform(), before);

    authority.despawn();
    assert_eq!(Arc::strong_count(&wire), 1);
    Ok(())
}

#[tokio::test]
async fn join_rejects_empty_and_unknown_codes() -> anyhow::Result<()> {
    let sessions = LocalSessions::new(MovementConfig::default());
    let created = sessions.create_session(2).await?;

    let empty = sessions.join_session("  ").await.unwrap_err();
    assert!(empty.to_string().contains("not entered"));
    let unknown = sessions.join_session("??????").await.unwrap_err();
    assert!(unknown.to_string().contains("not valid"));

    sessions
        .start_transport(&created, TransportRole::Host)
        .await?;
    let again = sessions
        .start_transport(&created, TransportRole::Host)
        .await
        .unwrap_err();
    assert!(again.to_string().contains("already started"));
    Ok(())
}

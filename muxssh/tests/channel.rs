use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use rand::{Rng, SeedableRng};
use sha1::Digest;

use muxssh::{
    channel::{Inbound, State},
    msg::{connect, Message},
    session::Event,
    Error,
};

mod common;

#[async_std::test]
async fn open_is_confirmed() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;

    let channel = common::channel(&session, &peer, 1024, 256).await;

    assert_eq!(channel.state(), State::Open);
    assert_eq!(channel.remote_id(), Some(channel.id() + 100));
    assert_eq!(channel.remote_window(), 1024);
    assert_eq!(channel.remote_packet_size(), 256);

    Ok(())
}

#[async_std::test]
async fn open_failure_is_reported_to_the_opener() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;

    let (result, _) = futures::join!(session.open_session(), async {
        let open = peer.expect_open().await;

        peer.send(connect::ChannelOpenFailure {
            recipient_channel: open.sender_channel,
            reason: connect::OpenFailureReason::ConnectFailed,
            description: "nobody home".into(),
            language: Default::default(),
        });
    });

    assert!(matches!(
        result,
        Err(Error::ChannelOpenFailure {
            reason: connect::OpenFailureReason::ConnectFailed,
            ref description,
        }) if description == "nobody home"
    ));
    assert!(session.is_connected());

    Ok(())
}

#[async_std::test]
async fn late_confirmation_closes_the_abandoned_channel() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;

    let result = session.open_session().await;
    assert!(matches!(result, Err(Error::OperationTimeout)));

    let open = peer.expect_open().await;
    peer.confirm(&open, 1024, 256);

    assert!(matches!(peer.expect().await, Message::ChannelEof(_)));
    assert!(matches!(
        peer.expect().await,
        Message::ChannelClose(connect::ChannelClose { recipient_channel }) if recipient_channel == open.sender_channel + 100
    ));

    Ok(())
}

#[async_std::test]
async fn writes_are_split_by_packet_size() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 1024, 4).await;

    channel.write(b"0123456789").await?;

    let mut sizes = Vec::new();
    for _ in 0..3 {
        match peer.expect().await {
            Message::ChannelData(data) => sizes.push(data.data.len()),
            other => panic!("Unexpected message: {other:?}"),
        }
    }

    assert_eq!(sizes, [4, 4, 2]);
    assert_eq!(channel.remote_window(), 1014);

    Ok(())
}

#[async_std::test]
async fn concurrent_writers_never_overspend_the_window() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 1000, 64).await;

    let (first, second) = ([0xaa; 800], [0xbb; 800]);
    let writers = futures::future::try_join(channel.write(&first), channel.write(&second));

    let peer_side = async {
        let mut received = 0;

        while received < 1000 {
            match peer.expect().await {
                Message::ChannelData(data) => received += data.data.len(),
                other => panic!("Unexpected message: {other:?}"),
            }
        }
        assert_eq!(received, 1000);
        peer.expect_silence().await;

        peer.send(connect::ChannelWindowAdjust {
            recipient_channel: channel.id(),
            bytes_to_add: 600,
        });

        while received < 1600 {
            match peer.expect().await {
                Message::ChannelData(data) => received += data.data.len(),
                other => panic!("Unexpected message: {other:?}"),
            }
        }

        received
    };

    let (written, received) = futures::join!(writers, peer_side);
    written?;

    assert_eq!(received, 1600);
    assert_eq!(channel.remote_window(), 1000 + 600 - 1600);

    Ok(())
}

#[async_std::test]
async fn concurrent_writes_are_not_interleaved() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 100, 64).await;

    let (first, second) = ([0xaa; 300], [0xbb; 50]);
    let writers = futures::future::try_join(channel.write(&first), channel.write(&second));

    let peer_side = async {
        let mut received = Vec::new();
        let mut expected = 100;

        loop {
            while received.len() < expected {
                match peer.expect().await {
                    Message::ChannelData(data) => received.extend_from_slice(&data.data),
                    other => panic!("Unexpected message: {other:?}"),
                }
            }
            if expected == first.len() + second.len() {
                break received;
            }

            // Trickle the window, giving the second writer a chance to cut in.
            peer.send(connect::ChannelWindowAdjust {
                recipient_channel: channel.id(),
                bytes_to_add: 50,
            });
            expected += 50;
        }
    };

    let (written, received) = futures::join!(writers, peer_side);
    written?;

    assert_eq!(received[..300], first);
    assert_eq!(received[300..], second);

    Ok(())
}

#[async_std::test]
async fn exhausted_window_times_out() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 0, 64).await;

    assert!(matches!(
        channel.write(b"stuck").await,
        Err(Error::OperationTimeout)
    ));

    Ok(())
}

#[async_std::test]
async fn window_is_replenished_as_data_is_drained() -> Result<(), eyre::Error> {
    let config = muxssh::Config {
        window_size: 64,
        packet_size: 16,
        ..common::quick()
    };
    let (session, peer) = common::connect(config).await;
    let channel = common::channel(&session, &peer, 1024, 256).await;

    peer.send(connect::ChannelData {
        recipient_channel: channel.id(),
        data: vec![1; 40].into(),
    });
    peer.expect_silence().await;

    assert_eq!(channel.read().await?, Some(vec![1; 40]));

    assert!(matches!(
        peer.expect().await,
        Message::ChannelWindowAdjust(connect::ChannelWindowAdjust {
            bytes_to_add: 40,
            ..
        })
    ));
    assert_eq!(channel.local_window(), 64);

    Ok(())
}

#[async_std::test]
async fn close_handshake_completes() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 1024, 256).await;

    let closed = Arc::new(AtomicUsize::new(0));
    let _subscription = session.subscribe({
        let closed = closed.clone();
        move |event| {
            if let Event::ChannelClosed { .. } = event {
                closed.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let (result, _) = futures::join!(channel.close(), async {
        assert!(matches!(peer.expect().await, Message::ChannelEof(_)));
        assert!(matches!(peer.expect().await, Message::ChannelClose(_)));

        peer.send(connect::ChannelClose {
            recipient_channel: channel.id(),
        });
    });
    result?;

    assert_eq!(channel.state(), State::Closed);

    channel.close().await?;
    drop(channel);
    peer.expect_silence().await;

    assert_eq!(closed.load(Ordering::SeqCst), 1);

    Ok(())
}

#[async_std::test]
async fn close_is_forced_after_the_timeout() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 1024, 256).await;

    channel.close().await?;

    assert_eq!(channel.state(), State::Closed);
    assert!(matches!(peer.expect().await, Message::ChannelEof(_)));
    assert!(matches!(peer.expect().await, Message::ChannelClose(_)));
    assert!(matches!(
        channel.write(b"late").await,
        Err(Error::ChannelClosed)
    ));

    Ok(())
}

#[async_std::test]
async fn dropping_sends_eof_and_close_once() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 1024, 256).await;

    channel.eof()?;
    channel.eof()?;
    drop(channel);

    assert!(matches!(peer.expect().await, Message::ChannelEof(_)));
    assert!(matches!(peer.expect().await, Message::ChannelClose(_)));
    peer.expect_silence().await;

    Ok(())
}

#[async_std::test]
async fn dropped_channels_are_torn_down_after_the_timeout() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;

    let closed = Arc::new(AtomicUsize::new(0));
    let _subscription = session.subscribe({
        let closed = closed.clone();
        move |event| {
            if let Event::ChannelClosed { .. } = event {
                closed.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let mut ids = Vec::new();
    for _ in 0..3 {
        let channel = common::channel(&session, &peer, 1024, 256).await;
        ids.push(channel.id());
        drop(channel);

        assert!(matches!(peer.expect().await, Message::ChannelEof(_)));
        assert!(matches!(peer.expect().await, Message::ChannelClose(_)));
    }

    async_std::task::sleep(std::time::Duration::from_millis(400)).await;

    assert_eq!(closed.load(Ordering::SeqCst), 3);
    assert!(format!("{session:?}").contains("channels: 0"));

    // A late acknowledgment targets a channel which no longer exists.
    peer.send(connect::ChannelClose {
        recipient_channel: ids[0],
    });
    peer.expect_silence().await;
    assert!(session.is_connected());

    Ok(())
}

#[async_std::test]
async fn peer_close_is_acknowledged() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 1024, 256).await;

    peer.send(connect::ChannelData {
        recipient_channel: channel.id(),
        data: "bye".into(),
    });
    peer.send(connect::ChannelEof {
        recipient_channel: channel.id(),
    });
    peer.send(connect::ChannelClose {
        recipient_channel: channel.id(),
    });

    assert!(matches!(channel.recv().await?, Some(Inbound::Data(data)) if data == b"bye"));
    assert!(matches!(channel.recv().await?, Some(Inbound::Eof)));
    assert!(channel.recv().await?.is_none());

    assert!(matches!(peer.expect().await, Message::ChannelEof(_)));
    assert!(matches!(peer.expect().await, Message::ChannelClose(_)));
    assert_eq!(channel.state(), State::Closed);

    Ok(())
}

#[async_std::test]
async fn requests_are_answered_in_order() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 1024, 256).await;

    let requests = futures::future::join(channel.env("LANG", "C"), channel.exec("true"));
    let (results, _) = futures::join!(requests, async {
        for _ in 0..2 {
            assert!(matches!(peer.expect().await, Message::ChannelRequest(_)));
        }

        peer.send(connect::ChannelFailure {
            recipient_channel: channel.id(),
        });
        peer.send(connect::ChannelSuccess {
            recipient_channel: channel.id(),
        });
    });

    assert!(matches!(results.0, Err(Error::ChannelRequestFailure(ref name)) if name == "env"));
    assert!(results.1.is_ok());

    Ok(())
}

#[async_std::test]
async fn exit_status_is_recorded_and_requests_rejected() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 1024, 256).await;

    peer.send(connect::ChannelRequest {
        recipient_channel: channel.id(),
        request_type: "exit-status".into(),
        want_reply: false.into(),
        data: vec![0, 0, 0, 3],
    });
    peer.send(connect::ChannelRequest {
        recipient_channel: channel.id(),
        request_type: "keepalive@openssh.com".into(),
        want_reply: true.into(),
        data: Vec::new(),
    });
    peer.send(connect::ChannelEof {
        recipient_channel: channel.id(),
    });

    assert_eq!(channel.read().await?, None);
    assert_eq!(channel.exit_status(), Some(3));
    assert!(matches!(
        peer.expect().await,
        Message::ChannelFailure(connect::ChannelFailure { recipient_channel }) if recipient_channel == channel.id() + 100
    ));

    Ok(())
}

#[async_std::test]
async fn session_failure_reaches_channels() -> Result<(), eyre::Error> {
    let (session, mut peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 0, 256).await;

    let (write, _) = futures::join!(channel.write(b"blocked"), async {
        async_std::task::sleep(std::time::Duration::from_millis(50)).await;
        peer.hang_up();
    });

    assert!(matches!(write, Err(Error::Session(ref err)) if matches!(**err, Error::Disconnected)));
    assert!(matches!(channel.recv().await, Err(Error::Session(_))));
    assert_eq!(channel.state(), State::Closed);
    assert!(!session.is_connected());

    Ok(())
}

#[async_std::test]
async fn transfers_are_intact_across_window_adjusts() -> Result<(), eyre::Error> {
    let (session, peer) = common::connect(common::quick()).await;
    let channel = common::channel(&session, &peer, 4096, 512).await;

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let (upload, download) = (
        (0..16 * 1024).map(|_| rng.gen()).collect::<Vec<u8>>(),
        (0..16 * 1024).map(|_| rng.gen()).collect::<Vec<u8>>(),
    );

    let (written, uploaded) = futures::join!(channel.write(&upload), async {
        let mut hasher = sha1::Sha1::new();
        let mut received = 0;

        while received < upload.len() {
            match peer.expect().await {
                Message::ChannelData(data) => {
                    assert!(data.data.len() <= 512);
                    hasher.update(&*data.data);
                    received += data.data.len();

                    peer.send(connect::ChannelWindowAdjust {
                        recipient_channel: channel.id(),
                        bytes_to_add: data.data.len() as u32,
                    });
                }
                other => panic!("Unexpected message: {other:?}"),
            }
        }

        hasher.finalize()
    });
    written?;

    assert_eq!(uploaded, sha1::Sha1::digest(&upload));

    for chunk in download.chunks(1024) {
        peer.send(connect::ChannelData {
            recipient_channel: channel.id(),
            data: chunk.into(),
        });
    }
    peer.send(connect::ChannelEof {
        recipient_channel: channel.id(),
    });

    let mut downloaded = sha1::Sha1::new();
    while let Some(data) = channel.read().await? {
        downloaded.update(&data);
    }

    assert_eq!(downloaded.finalize(), sha1::Sha1::digest(&download));

    Ok(())
}

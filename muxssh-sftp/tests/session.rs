use std::collections::HashSet;

use futures_time::future::FutureExt;

use muxssh_sftp::{
    protocol::{self, Attrs, AttrsResponse, Data, Entry, Handle, Name, OpenFlags, Status, StatusCode},
    stream::{FileAccess, FileMode},
    Error, SftpFileStream, SftpSession,
};

mod common;

fn status(id: u32, code: StatusCode, message: &str) -> Status {
    Status {
        id,
        code,
        message: message.into(),
        language: Default::default(),
    }
}

fn entry(name: &str) -> Entry {
    Entry {
        filename: name.into(),
        longname: format!("-rw-r--r-- 1 tester tester 0 Jan 1 00:00 {name}").into(),
        attrs: Default::default(),
    }
}

#[async_std::test]
async fn version_and_extensions_are_negotiated() -> Result<(), eyre::Error> {
    let (session, accept) = common::server(Default::default()).await;

    let (sftp, _server) = futures::join!(
        SftpSession::connect(&session, common::quick()),
        async {
            let mut server = accept.await;
            common::negotiate(&mut server, 3, &[("posix-rename@openssh.com", "1")]).await;

            server
        }
    );
    let sftp = sftp?;

    assert_eq!(sftp.version(), 3);
    assert_eq!(
        sftp.extensions(),
        [("posix-rename@openssh.com".to_string(), b"1".to_vec())]
    );
    assert!(sftp.is_open());

    Ok(())
}

#[async_std::test]
async fn unsupported_version_is_refused() -> Result<(), eyre::Error> {
    let (session, accept) = common::server(Default::default()).await;

    let (sftp, _server) = futures::join!(
        SftpSession::connect(&session, common::quick()),
        async {
            let mut server = accept.await;
            common::negotiate(&mut server, 6, &[]).await;

            server
        }
    );

    assert!(matches!(sftp, Err(Error::UnsupportedVersion(6))));

    Ok(())
}

#[async_std::test]
async fn responses_in_reverse_order_reach_their_requester() -> Result<(), eyre::Error> {
    const COUNT: usize = 8;

    let (_session, sftp, mut server) = common::sftp().await;

    let paths: Vec<_> = (0..COUNT).map(|index| format!("/file{index}")).collect();
    let requests = futures::future::join_all(paths.iter().map(|path| sftp.stat(path)));

    let (results, _) = futures::join!(requests, async {
        let mut received = Vec::new();
        for _ in 0..COUNT {
            received.push(server.expect::<protocol::Stat>().await);
        }

        let ids: HashSet<_> = received.iter().map(|stat| stat.id).collect();
        assert_eq!(ids.len(), COUNT);
        assert_eq!(sftp.outstanding(), COUNT);

        for stat in received.into_iter().rev() {
            let index = stat.path.to_string_lossy()["/file".len()..].parse().unwrap();

            server.respond(AttrsResponse {
                id: stat.id,
                attrs: Attrs::with_size(index),
            });
        }
    });

    for (index, result) in results.into_iter().enumerate() {
        assert_eq!(result?.size, Some(index as u64));
    }
    assert_eq!(sftp.outstanding(), 0);

    Ok(())
}

#[async_std::test]
async fn responses_keep_their_type_across_requests() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (data, path, _) = futures::join!(
        sftp.read(b"handle", 0, 16),
        sftp.realpath("."),
        async {
            let mut requests = vec![server.request().await, server.request().await];
            requests.sort_by_key(|request| request.kind);

            let [read, realpath] = <[_; 2]>::try_from(requests).unwrap();
            assert_eq!((read.kind, realpath.kind), (5, 16));

            server.respond(Name::new(realpath.id, vec![entry("/home/tester")]));
            server.respond(Data {
                id: read.id,
                data: "content".into(),
            });
        }
    );

    assert_eq!(data?, b"content");
    assert_eq!(path?, "/home/tester");

    Ok(())
}

#[async_std::test]
async fn cancelled_requests_release_their_identifier() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (cancelled, abandoned) = futures::join!(
        sftp.stat("/slow")
            .timeout(futures_time::time::Duration::from_millis(100)),
        async { server.expect::<protocol::Stat>().await.id }
    );

    assert!(cancelled.is_err());
    assert_eq!(sftp.outstanding(), 0);

    // The late response is dropped without disturbing the next request.
    server.respond(AttrsResponse {
        id: abandoned,
        attrs: Attrs::with_size(1),
    });

    let (result, _) = futures::join!(sftp.stat("/fast"), async {
        let stat: protocol::Stat = server.expect().await;
        assert_ne!(stat.id, abandoned);

        server.respond(AttrsResponse {
            id: stat.id,
            attrs: Attrs::with_size(3),
        });
    });

    assert_eq!(result?.size, Some(3));
    assert!(sftp.is_open());

    Ok(())
}

#[async_std::test]
async fn unanswered_requests_time_out() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (result, _) = futures::join!(sftp.remove("/ignored"), server.expect::<protocol::Remove>());

    assert!(matches!(
        result,
        Err(Error::Connect(muxssh::Error::OperationTimeout))
    ));
    assert_eq!(sftp.outstanding(), 0);

    Ok(())
}

#[async_std::test]
async fn status_codes_become_typed_errors() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (missing, denied, failed, _) = futures::join!(
        sftp.open("/missing", OpenFlags::READ),
        sftp.mkdir("/root/denied"),
        sftp.rename("/a", "/b"),
        async {
            let mut requests = Vec::new();
            for _ in 0..3 {
                requests.push(server.request().await);
            }
            requests.sort_by_key(|request| request.kind);

            let [open, mkdir, rename] = <[_; 3]>::try_from(requests).unwrap();
            assert_eq!((open.kind, mkdir.kind, rename.kind), (3, 14, 18));

            let open: protocol::Open = protocol::decode(&open.packet).unwrap();
            assert_eq!(open.pflags, OpenFlags::READ);

            server.respond(status(rename.id, StatusCode::Failure, "busy"));
            server.respond(status(mkdir.id, StatusCode::PermissionDenied, "denied"));
            server.respond(status(open.id, StatusCode::NoSuchFile, "gone"));
        }
    );

    assert!(matches!(missing, Err(Error::NoSuchFile(ref message)) if message == "gone"));
    assert!(matches!(denied, Err(Error::PermissionDenied(ref message)) if message == "denied"));
    assert!(matches!(
        failed,
        Err(Error::Status { code: StatusCode::Failure, ref message }) if message == "busy"
    ));
    assert!(sftp.is_open());

    Ok(())
}

#[async_std::test]
async fn end_of_file_reads_nothing() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (data, _) = futures::join!(sftp.read(b"handle", 1024, 16), async {
        let read: protocol::Read = server.expect().await;
        assert_eq!(read.offset, 1024);
        assert_eq!(read.len, 16);

        server.respond(status(read.id, StatusCode::Eof, "EOF"));
    });

    assert!(data?.is_empty());

    Ok(())
}

#[async_std::test]
async fn closing_the_channel_fails_outstanding_requests() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (result, _) = futures::join!(sftp.fstat(b"handle"), async {
        server.expect::<protocol::Fstat>().await;
        server.close();
    });

    assert!(matches!(result, Err(Error::Closed)));
    assert!(!sftp.is_open());
    assert!(matches!(sftp.stat("/").await, Err(Error::Closed)));

    Ok(())
}

#[async_std::test]
async fn malformed_responses_close_the_session() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (stat, readlink, _) = futures::join!(sftp.stat("/file"), sftp.readlink("/link"), async {
        let mut requests = vec![server.request().await, server.request().await];
        requests.sort_by_key(|request| request.kind);

        let stat = &requests[0];
        assert_eq!(stat.kind, 17);

        let mut truncated = vec![105];
        truncated.extend_from_slice(&stat.id.to_be_bytes());
        server.send_packet([&(truncated.len() as u32).to_be_bytes()[..], &truncated].concat());

        server.expect_close().await;
    });

    assert!(matches!(stat, Err(Error::ProtocolViolation(_))));
    assert!(matches!(readlink, Err(Error::ProtocolViolation(_))));
    assert!(!sftp.is_open());
    assert!(matches!(sftp.realpath(".").await, Err(Error::Closed)));

    Ok(())
}

#[async_std::test]
async fn oversized_packets_close_the_session() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (stat, _) = futures::join!(sftp.stat("/file"), async {
        server.expect::<protocol::Stat>().await;

        server.send_packet(vec![0xff, 0xff, 0xff, 0xf0, 103, 0, 0, 0, 0]);
        server.expect_close().await;
    });

    assert!(matches!(
        stat,
        Err(Error::ProtocolViolation("packet exceeds the maximum length"))
    ));
    assert!(!sftp.is_open());

    Ok(())
}

async fn serve_listing(server: &mut common::Server) {
    let opendir: protocol::Opendir = server.expect().await;
    assert_eq!(&*opendir.path, b"/dir");
    server.respond(Handle {
        id: opendir.id,
        handle: "dir".into(),
    });

    let readdir: protocol::Readdir = server.expect().await;
    server.respond(Name::new(readdir.id, vec![entry("."), entry("..")]));

    let readdir: protocol::Readdir = server.expect().await;
    server.respond(Name::new(readdir.id, vec![entry("file")]));

    let readdir: protocol::Readdir = server.expect().await;
    server.respond(status(readdir.id, StatusCode::Eof, ""));

    let close: protocol::Close = server.expect().await;
    assert_eq!(&*close.handle, b"dir");
    server.respond(status(close.id, StatusCode::Ok, ""));
}

#[async_std::test]
async fn directories_are_listed_until_the_end() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (entries, _) = futures::join!(sftp.list_directory("/dir"), serve_listing(&mut server));
    let names: Vec<_> = entries?
        .into_iter()
        .map(|entry| entry.filename.to_string_lossy())
        .collect();

    assert_eq!(names, [".", "..", "file"]);

    Ok(())
}

#[async_std::test]
async fn background_listing_is_retrieved_once() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let listing = sftp.begin_list_directory("/dir")?;
    serve_listing(&mut server).await;

    assert_eq!(listing.end().await?.len(), 3);
    assert!(listing.is_completed());
    assert!(matches!(
        listing.end().await,
        Err(Error::InvalidOperation(_))
    ));

    Ok(())
}

#[async_std::test]
async fn optimal_lengths_fit_a_single_packet() -> Result<(), eyre::Error> {
    let (_session, sftp, _server) = common::sftp().await;

    assert_eq!(sftp.calculate_optimal_read_length(64 * 1024), 32768 - 13);
    assert_eq!(sftp.calculate_optimal_read_length(100), 87);
    assert_eq!(
        sftp.calculate_optimal_write_length(64 * 1024, b"handle"),
        32768 - 25 - 6
    );
    assert_eq!(sftp.calculate_optimal_write_length(100, b"handle"), 69);

    Ok(())
}

#[async_std::test]
async fn streams_run_over_the_session() -> Result<(), eyre::Error> {
    let (_session, sftp, mut server) = common::sftp().await;

    let (stream, _) = futures::join!(
        SftpFileStream::open(
            sftp.clone(),
            "/upload",
            FileMode::Create,
            FileAccess::READ_WRITE,
            4096,
        ),
        async {
            let open: protocol::Open = server.expect().await;
            assert_eq!(&*open.filename, b"/upload");
            assert_eq!(
                open.pflags,
                OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC
            );

            server.respond(Handle {
                id: open.id,
                handle: "file".into(),
            });
        }
    );
    let mut stream = stream?;

    assert_eq!(stream.read_buffer_size(), 4096 - 13);
    assert_eq!(stream.write_buffer_size(), 4096 - 25 - 4);

    stream.write(b"hello").await?;
    assert_eq!(stream.position(), 5);

    let (closed, _) = futures::join!(stream.close(), async {
        let write: protocol::Write = server.expect().await;
        assert_eq!(&*write.handle, b"file");
        assert_eq!(write.offset, 0);
        assert_eq!(&*write.data, b"hello");
        server.respond(status(write.id, StatusCode::Ok, ""));

        let close: protocol::Close = server.expect().await;
        server.respond(status(close.id, StatusCode::Ok, ""));
    });

    closed?;
    assert!(!stream.can_read());
    stream.close().await?;

    Ok(())
}

#[async_std::test]
async fn shutdown_fails_later_requests() -> Result<(), eyre::Error> {
    let (_session, sftp, _server) = common::sftp().await;

    sftp.shutdown().await?;
    sftp.shutdown().await?;

    assert!(!sftp.is_open());
    assert!(matches!(sftp.realpath(".").await, Err(Error::Closed)));

    Ok(())
}

mod common;

use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use common::{Fixture, MockTransport, RecordingBackend, pattern, write_file};
use purple_xfer::{
    Prompt, PromptKind, Transport, XferError, XferRole, XferSignal, XferStatus,
};

#[test]
fn request_without_ops_is_rejected() {
    let fx = Fixture::new();
    let xfer = fx.manager.new_xfer(XferRole::Send, "me", "bob");
    assert!(matches!(xfer.request(), Err(XferError::MissingInit)));
    assert!(fx.ui.prompts().is_empty());
}

#[test]
fn new_transfer_is_registered_and_announced() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);

    assert_eq!(xfer.status(), XferStatus::NotStarted);
    assert_eq!(fx.manager.all().len(), 1);
    assert!(fx.manager.get(xfer.id()).is_some());
    assert_eq!(fx.ui.events(), vec!["new"]);
}

#[test]
fn send_request_accepts_chosen_file() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "report.pdf", &pattern(2048));
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);

    xfer.request().unwrap();
    assert_eq!(
        fx.ui.last_prompt(),
        Some(Prompt::ChooseFile {
            suggested: None,
            save: false
        })
    );
    assert_eq!(xfer.pending_prompt(), Some(PromptKind::ChooseFile));

    xfer.respond_file(Some(&path)).unwrap();
    assert_eq!(xfer.local_path().as_deref(), Some(path.as_path()));
    assert_eq!(xfer.size(), 2048);
    assert_eq!(xfer.bytes_remaining(), 2048);
    assert_eq!(xfer.filename().as_deref(), Some("report.pdf"));
    assert_eq!(xfer.status(), XferStatus::Accepted);
    assert_eq!(backend.events(), vec!["init"]);
    assert!(fx.ui.events().contains(&"add"));
    assert!(
        fx.ui
            .messages()
            .contains(&("Offering to send report.pdf to alice".to_string(), false))
    );
}

#[test]
fn send_rejects_parent_traversal_without_opening() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request().unwrap();

    let err = xfer.respond_file(Some(Path::new("../evil"))).unwrap_err();
    assert!(matches!(err, XferError::InvalidPath(_)));
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert_eq!(backend.events(), vec!["request_denied"]);
    assert!(xfer.local_path().is_none());
    assert!(xfer.transport().is_none());

    let errors = fx.ui.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "File transfer to alice failed.");
    assert_eq!(errors[0].1, "../evil is not a valid filename.");
}

#[test]
fn send_rejects_zero_byte_file() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "empty.txt", b"");
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request().unwrap();

    let err = xfer.request_accepted(Some(&path)).unwrap_err();
    assert!(matches!(err, XferError::EmptyFile(_)));
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert!(xfer.local_path().is_none());
    assert_eq!(xfer.size(), 0);
    assert_eq!(backend.events(), vec!["request_denied"]);
    assert!(!fx.ui.events().contains(&"cancel_local"));
    assert_eq!(fx.ui.errors()[0].1, "Cannot send a file of 0 bytes.");
}

#[test]
fn send_rejects_directory() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request().unwrap();

    let err = xfer.request_accepted(Some(dir.path())).unwrap_err();
    assert!(matches!(err, XferError::IsDirectory(_)));
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert_eq!(backend.events(), vec!["request_denied"]);
    assert!(!fx.ui.events().contains(&"cancel_local"));
    assert_eq!(fx.ui.errors()[0].1, "Cannot send a directory.");
}

#[test]
fn send_missing_file_reports_read_error() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request().unwrap();

    let missing = dir.path().join("gone.bin");
    assert!(matches!(
        xfer.request_accepted(Some(&missing)),
        Err(XferError::Io(_))
    ));
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert!(fx.ui.errors()[0].1.starts_with("Error reading"));
}

#[test]
fn receive_into_directory_is_denied() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("photo.jpg");
    xfer.set_size(100);
    xfer.request().unwrap();
    xfer.respond_accept(true).unwrap();

    let err = xfer.respond_file(Some(dir.path())).unwrap_err();
    assert!(matches!(err, XferError::NotRegularFile(_)));
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert_eq!(backend.events(), vec!["request_denied"]);
    assert_eq!(fx.ui.errors()[0].0, "File transfer from alice failed.");
    assert!(fx.ui.errors()[0].1.contains("Cowardly refusing"));
}

#[cfg(unix)]
#[test]
fn unreadable_source_asks_again() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "secret.bin", b"top secret");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();
    if std::fs::File::open(&path).is_ok() {
        // Running privileged; permission bits are not enforced.
        return;
    }

    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request().unwrap();

    let err = xfer.respond_file(Some(&path)).unwrap_err();
    assert!(matches!(err, XferError::NotReadable(_)));
    assert_eq!(fx.ui.errors()[0].1, "File is not readable.");
    assert_eq!(xfer.status(), XferStatus::NotStarted);
    let choose = Prompt::ChooseFile {
        suggested: None,
        save: false,
    };
    assert_eq!(fx.ui.prompts(), vec![choose.clone(), choose]);
    assert!(backend.events().is_empty());
}

#[test]
fn receive_into_missing_directory_is_denied() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("photo.jpg");
    xfer.request().unwrap();
    xfer.respond_accept(true).unwrap();

    let target = dir.path().join("nope").join("photo.jpg");
    assert!(matches!(
        xfer.respond_file(Some(&target)),
        Err(XferError::DirectoryNotWritable(_))
    ));
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert_eq!(fx.ui.errors()[0].1, "Directory is not writable.");
}

#[test]
fn receive_offer_flow() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("song.ogg");
    xfer.set_size(1536 * 1024);
    xfer.set_message("have a listen");

    xfer.request().unwrap();
    assert_eq!(
        fx.ui.last_prompt(),
        Some(Prompt::Offer {
            primary: "alice wants to send you song.ogg (1.5 MiB)".into(),
            thumbnail: None,
        })
    );
    let messages = fx.ui.messages();
    assert_eq!(messages[0].0, "alice is offering to send file song.ogg");
    assert_eq!(messages[1].0, "have a listen");

    xfer.respond_accept(true).unwrap();
    assert_eq!(
        fx.ui.last_prompt(),
        Some(Prompt::ChooseFile {
            suggested: Some("song.ogg".into()),
            save: true
        })
    );

    let target = dir.path().join("song.ogg");
    xfer.respond_file(Some(&target)).unwrap();
    assert_eq!(xfer.status(), XferStatus::Accepted);
    assert_eq!(xfer.local_path().as_deref(), Some(target.as_path()));
    assert_eq!(backend.events(), vec!["init"]);
    assert!(
        fx.ui
            .messages()
            .iter()
            .any(|(m, _)| m == "Starting transfer of song.ogg from alice")
    );
}

#[test]
fn receive_without_name_asks_to_accept() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_remote_address("10.0.0.7", 4455);

    xfer.request().unwrap();
    assert_eq!(
        fx.ui.last_prompt(),
        Some(Prompt::Accept {
            primary: "Accept file transfer request from alice?".into(),
            secondary: Some(
                "A file is available for download from:\nRemote host: 10.0.0.7\nRemote port: 4455"
                    .into()
            ),
        })
    );

    xfer.respond_accept(true).unwrap();
    assert_eq!(xfer.status(), XferStatus::Accepted);
    assert_eq!(backend.events(), vec!["init"]);
    assert!(xfer.local_path().is_none());
}

#[test]
fn declining_an_offer_denies() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("virus.exe");
    xfer.request().unwrap();

    xfer.respond_accept(false).unwrap();
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert_eq!(backend.events(), vec!["request_denied"]);
}

#[test]
fn stale_responses_are_ignored() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("a.txt");
    xfer.request().unwrap();

    assert!(matches!(
        xfer.respond_file(Some(Path::new("/tmp/a.txt"))),
        Err(XferError::NoPendingPrompt)
    ));
    assert_eq!(xfer.pending_prompt(), Some(PromptKind::Offer));

    xfer.cancel_local();
    assert_eq!(xfer.pending_prompt(), None);
    assert_eq!(fx.ui.closed_requests.load(Ordering::SeqCst), 1);
    assert!(matches!(
        xfer.respond_accept(true),
        Err(XferError::NoPendingPrompt)
    ));
}

#[test]
fn preset_local_path_auto_proceeds() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("notes.txt");
    xfer.set_size(10);
    xfer.set_local_path(dir.path().join("notes.txt"));

    xfer.request().unwrap();
    assert!(fx.ui.prompts().is_empty());
    assert_eq!(xfer.status(), XferStatus::Accepted);
    assert_eq!(backend.events(), vec!["init"]);
}

#[test]
fn synchronous_answers_from_the_notifier() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "data.bin", &pattern(10));
    *fx.ui.auto_file.lock().unwrap() = Some(path.clone());

    let backend = RecordingBackend::on_init(|xfer| {
        let t: Arc<dyn Transport> = MockTransport::new();
        xfer.start(Some(t), None).unwrap();
    });
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request().unwrap();

    assert_eq!(xfer.status(), XferStatus::Started);
    assert_eq!(backend.events(), vec!["init", "start"]);
    assert_eq!(fx.event_loop.watch_count(), 1);
}

#[test]
fn recv_request_signal_can_veto() {
    let fx = Fixture::new();
    fx.manager
        .signals()
        .connect(XferSignal::RecvRequest, |xfer| xfer.cancel_local());
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("spam.zip");

    xfer.request().unwrap();
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert!(fx.ui.prompts().is_empty());
    assert_eq!(backend.events(), vec!["cancel_recv"]);
}

#[test]
fn signals_follow_the_lifecycle() {
    let fx = Fixture::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    fx.manager
        .signals()
        .connect_all(move |sig, _| s.lock().unwrap().push(sig.name()));

    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("x.bin");
    xfer.request().unwrap();
    xfer.respond_accept(false).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["file-recv-request", "file-recv-cancel"]
    );
}

#[test]
fn cancel_before_start_opens_nothing() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);

    xfer.cancel_local();
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert!(xfer.transport().is_none());
    assert!(xfer.end_time().is_some());
    assert_eq!(fx.event_loop.watch_count(), 0);
    assert_eq!(fx.ui.messages(), vec![("File transfer cancelled".to_string(), false)]);
    assert_eq!(fx.ui.events(), vec!["new", "cancel_local"]);

    drop(xfer);
    assert!(fx.manager.all().is_empty());
    assert_eq!(fx.ui.events().last(), Some(&"destroy"));
}

#[test]
fn terminal_calls_release_once() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "f.bin", &pattern(100));
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request_accepted(Some(&path)).unwrap();

    let transport = MockTransport::new();
    xfer.start(Some(transport.clone()), None).unwrap();

    xfer.cancel_local();
    xfer.cancel_local();
    xfer.cancel_remote();
    xfer.end();

    assert_eq!(transport.close_count(), 1);
    assert_eq!(backend.count("cancel_send"), 1);
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert_eq!(xfer.bytes_remaining(), 0);
    assert_eq!(fx.event_loop.watch_count(), 0);
}

#[test]
fn end_on_incomplete_transfer_cancels_locally() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "f.bin", &pattern(100));
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request_accepted(Some(&path)).unwrap();
    let transport = MockTransport::new();
    xfer.start(Some(transport.clone()), None).unwrap();

    xfer.end();
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert_eq!(backend.count("end"), 0);
    assert_eq!(backend.count("cancel_send"), 1);
    assert_eq!(
        fx.ui.messages().last().map(|(m, _)| m.clone()),
        Some("You cancelled the transfer of f.bin".to_string())
    );
}

#[test]
fn cancel_remote_reports_error() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("big.iso");

    xfer.cancel_remote();
    assert_eq!(xfer.status(), XferStatus::CancelledRemote);
    assert_eq!(
        fx.ui.messages(),
        vec![("alice cancelled the transfer of big.iso".to_string(), true)]
    );
    assert_eq!(fx.ui.errors()[0].0, "File transfer from alice failed.");
    assert_eq!(fx.ui.events().last(), Some(&"cancel_remote"));
    assert_eq!(backend.events(), vec!["cancel_recv"]);
}

#[test]
fn terminal_status_is_sticky() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.cancel_local();

    assert!(!xfer.set_status(XferStatus::Started));
    assert!(!xfer.set_status(XferStatus::Done));
    assert!(!xfer.set_status(XferStatus::NotStarted));
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert!(matches!(
        xfer.start(Some(MockTransport::new()), None),
        Err(XferError::Terminal(XferStatus::CancelledLocal))
    ));
}

#[test]
fn starting_twice_is_an_error() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "f.bin", &pattern(100));
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request_accepted(Some(&path)).unwrap();

    xfer.start(Some(MockTransport::new()), None).unwrap();
    assert!(matches!(
        xfer.start(Some(MockTransport::new()), None),
        Err(XferError::AlreadyStarted)
    ));
    assert_eq!(backend.count("start"), 1);
}

#[test]
fn receive_connects_then_begins() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("in.bin");
    xfer.set_size(4);
    xfer.request_accepted(Some(&dir.path().join("in.bin"))).unwrap();

    xfer.start(None, Some(("192.0.2.1", 7000))).unwrap();
    assert_eq!(xfer.status(), XferStatus::Started);
    assert_eq!(
        fx.event_loop.pending_connects(),
        vec![("192.0.2.1".to_string(), 7000)]
    );
    assert!(xfer.start_time().is_none());

    let transport = MockTransport::new();
    transport.push_inbound(b"ping");
    assert!(fx.event_loop.complete_connect(Ok(transport.clone())));
    assert!(xfer.start_time().is_some());
    assert_eq!(xfer.remote_ip().as_deref(), Some("192.0.2.1"));

    fx.run(4);
    assert_eq!(xfer.status(), XferStatus::Done);
    assert_eq!(std::fs::read(dir.path().join("in.bin")).unwrap(), b"ping");
    assert_eq!(transport.close_count(), 1);
}

#[test]
fn failed_connect_cancels_locally() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.request_accepted(Some(&dir.path().join("in.bin"))).unwrap();

    xfer.start(None, Some(("192.0.2.1", 7000))).unwrap();
    fx.event_loop
        .complete_connect(Err(io::ErrorKind::ConnectionRefused.into()));
    assert_eq!(xfer.status(), XferStatus::CancelledLocal);
    assert!(fx.ui.errors()[0].1.starts_with("Unable to connect to 192.0.2.1:7000"));
}

#[test]
fn late_connect_closes_the_new_transport() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.request_accepted(Some(&dir.path().join("in.bin"))).unwrap();
    xfer.start(None, Some(("192.0.2.1", 7000))).unwrap();

    xfer.cancel_local();
    let transport = MockTransport::new();
    fx.event_loop.complete_connect(Ok(transport.clone()));
    assert_eq!(transport.close_count(), 1);
    assert_eq!(fx.event_loop.watch_count(), 0);
}

#[test]
fn dropping_a_started_transfer_cancels_it() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "f.bin", &pattern(100));
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Send, &backend);
    xfer.request_accepted(Some(&path)).unwrap();
    let transport = MockTransport::new();
    xfer.start(Some(transport.clone()), None).unwrap();

    drop(xfer);
    assert_eq!(transport.close_count(), 1);
    assert_eq!(backend.count("cancel_send"), 1);
    assert!(fx.manager.registry().is_empty());
    assert_eq!(fx.event_loop.watch_count(), 0);
    let events = fx.ui.events();
    assert_eq!(&events[events.len() - 2..], &["cancel_local", "destroy"]);
}

#[test]
fn requested_transfer_stays_alive_until_terminal() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("keep.txt");
    let id = xfer.id();
    xfer.request().unwrap();
    drop(xfer);

    let xfer = fx.manager.get(id).expect("kept alive by the pending request");
    xfer.respond_accept(false).unwrap();
    drop(xfer);
    assert!(fx.manager.get(id).is_none());
}

#[test]
fn thumbnail_is_offered_with_the_prompt() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfer = fx.xfer(XferRole::Receive, &backend);
    xfer.set_filename("cat.png");
    xfer.set_thumbnail(vec![1, 2, 3], "image/png");
    xfer.request().unwrap();

    match fx.ui.last_prompt() {
        Some(Prompt::Offer { thumbnail, .. }) => {
            let thumb = thumbnail.unwrap();
            assert_eq!(thumb.data, vec![1, 2, 3]);
            assert_eq!(thumb.mimetype, "image/png");
        }
        other => panic!("unexpected prompt {other:?}"),
    }
}

#[test]
fn ids_are_unique() {
    let fx = Fixture::new();
    let backend = RecordingBackend::new();
    let xfers: Vec<_> = (0..5).map(|_| fx.xfer(XferRole::Send, &backend)).collect();
    let mut ids: Vec<_> = xfers.iter().map(|x| x.id()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(fx.manager.all().len(), 5);
}

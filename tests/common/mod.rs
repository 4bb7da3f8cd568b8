//! Shared helpers for integration tests: a fixture config tree and a real
//! share listener on an ephemeral port.

use cursor_kit::configs::{ConfigDescriptor, ConfigKind};
use cursor_kit::share::{create_share_router, ShareState, TransferSession};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;

pub struct TestShare {
    pub url: String,
    pub session: Arc<TransferSession>,
    handle: axum_server::Handle,
}

impl Drop for TestShare {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Creates a `.cursor` tree with two rule files and resolves its descriptor.
pub fn cursor_fixture(root: &Path) -> ConfigDescriptor {
    let rules = root.join(".cursor").join("rules");
    std::fs::create_dir_all(&rules).expect("create fixture tree");
    std::fs::write(rules.join("a.mdc"), b"rule a from share").expect("write fixture");
    std::fs::write(rules.join("b.mdc"), b"rule b from share").expect("write fixture");
    ConfigDescriptor::resolve(ConfigKind::Cursor, root)
}

/// Binds a share router on an ephemeral loopback port and serves it.
pub async fn start_test_share(selected: Vec<ConfigDescriptor>) -> TestShare {
    let session = Arc::new(TransferSession::new());
    let state = ShareState::new(session.clone(), selected);
    let app = create_share_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    listener.set_nonblocking(true).expect("nonblocking");
    let port = listener.local_addr().expect("local addr").port();

    let handle = axum_server::Handle::new();
    let serve_handle = handle.clone();
    tokio::spawn(async move {
        axum_server::from_tcp(listener)
            .handle(serve_handle)
            .serve(app.into_make_service())
            .await
            .expect("test server");
    });
    handle.listening().await;

    TestShare {
        url: format!("http://127.0.0.1:{port}"),
        session,
        handle,
    }
}

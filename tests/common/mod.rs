#![allow(dead_code)]

pub mod apps {
    use brrtdispatch::handler::handler_fn;
    use brrtdispatch::{App, BoundaryValue, ServerConfig, TestClient};
    use std::sync::Arc;

    /// App with the default config and nothing registered.
    pub fn empty() -> App {
        App::default()
    }

    /// App without request ids, for byte-exact header assertions.
    pub fn quiet() -> App {
        let config = ServerConfig::builder()
            .enable_request_id(false)
            .build()
            .unwrap();
        App::new(config)
    }

    /// `GET {path}` answering with a fixed value.
    pub fn constant(app: &App, path: &str, value: impl Into<BoundaryValue>) {
        let value = value.into();
        app.route(
            "GET",
            path,
            Arc::new(handler_fn(move |_| Ok(value.clone())).named(path.to_string())),
        )
        .unwrap();
    }

    pub fn client(app: App) -> TestClient {
        TestClient::new(app)
    }
}

pub mod logs {
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// In-memory writer for asserting on emitted log lines.
    #[derive(Clone, Default)]
    pub struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Run `f` with a thread-local JSON subscriber and return what it logged.
    pub fn capture<T>(f: impl FnOnce() -> T) -> (T, String) {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(captured.clone())
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, captured.contents())
    }
}

pub mod runtime {
    use std::sync::Once;

    static MAY_INIT: Once = Once::new();

    /// Ensures May coroutines are configured only once
    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }
}

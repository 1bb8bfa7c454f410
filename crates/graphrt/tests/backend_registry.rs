mod common;

use std::sync::Arc;

use common::counting_backend;
use graphrt::backend::{create_backend, has_backend, list_backends, register_backend, unregister_backend};
use graphrt::{Backend, BackendError, BackendKind, BackendResult};

fn factory(configuration: &str) -> BackendResult<Arc<dyn Backend>> {
    let config = graphrt::BackendConfig::parse(configuration)?;
    config.ensure_known("TEST_REGISTRY", &[])?;
    Ok(Arc::new(counting_backend(BackendKind::Custom("TEST_REGISTRY".into()))))
}

#[test]
fn registered_backend_is_created_by_identity() {
    register_backend("TEST_REGISTRY", factory);
    assert!(has_backend("TEST_REGISTRY"));
    assert!(list_backends().contains(&"TEST_REGISTRY".to_string()));

    let backend = create_backend("TEST_REGISTRY", "").expect("default configuration");
    assert_eq!(backend.kind().identity(), "TEST_REGISTRY");

    let err = create_backend("TEST_REGISTRY", "bogus=1").err().expect("unknown option");
    assert!(matches!(err, BackendError::Config(_)));
}

#[test]
fn unknown_identity_is_an_error() {
    let err = graphrt::backend::create("NO_SUCH_BACKEND", "").err().expect("unknown");
    assert!(matches!(err, BackendError::UnknownBackend(ref name) if name == "NO_SUCH_BACKEND"));
}

#[test]
fn unregister_removes_factory() {
    register_backend("TEST_TRANSIENT", factory);
    assert!(unregister_backend("TEST_TRANSIENT"));
    assert!(!has_backend("TEST_TRANSIENT"));
    assert!(!unregister_backend("TEST_TRANSIENT"));
}

#[test]
fn kind_identities_round_trip() {
    for kind in [
        BackendKind::Interpreter,
        BackendKind::Cpu,
        BackendKind::Gpu,
        BackendKind::Custom("NNP".into()),
    ] {
        assert_eq!(BackendKind::from_identity(kind.identity()), kind);
    }
}

use hangar_common_core::{ErrorCategory, ErrorCode, Result};
use hangar_common_fs as fs;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_integration_with_core_types() {
    let result: Result<String> = fs::read_to_string("/nonexistent/registry.yaml", 1024);
    let error = result.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::FileSystem);
    assert_eq!(error.code(), ErrorCode::FILE_NOT_FOUND);
}

#[test]
fn test_path_normalization_integration() {
    let test_cases = vec![
        ("./a/b/../c", "a/c"),
        ("a/./b", "a/b"),
        ("a/../b", "b"),
        ("../../a/b", "../../a/b"),
        ("a/b/c/../../d", "a/d"),
        ("", "."),
        (".", "."),
        ("..", ".."),
    ];

    for (input, expected) in test_cases {
        let normalized = fs::path::normalize(input);
        assert_eq!(normalized, PathBuf::from(expected), "Failed for input: {}", input);
    }
}

#[test]
fn test_safe_path_joining() {
    let safe_cases = vec![
        ("/plugins", "demo", "/plugins/demo"),
        ("/plugins", "demo/hooks", "/plugins/demo/hooks"),
        ("relative/base", "demo", "relative/base/demo"),
    ];

    for (base, path, expected) in safe_cases {
        assert_eq!(
            fs::path::safe_join(base, path),
            Some(PathBuf::from(expected)),
            "Failed for safe_join({}, {})",
            base,
            path
        );
    }

    let dangerous_cases = vec![
        ("/plugins", "../escape"),
        ("/plugins", "/absolute/path"),
        ("/plugins", "normal/../escape"),
        ("plugins", "dir/../../escape"),
    ];

    for (base, path) in dangerous_cases {
        assert_eq!(
            fs::path::safe_join(base, path),
            None,
            "Expected None for dangerous safe_join({}, {})",
            base,
            path
        );
    }
}

#[test]
fn test_atomic_write_under_lock() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("registry.lock");
    let data_path = dir.path().join("registry.yaml");

    {
        let _guard = fs::FileLock::exclusive(&lock_path, Duration::from_secs(1)).unwrap();
        fs::write_string_atomic(&data_path, "revision: 1\n").unwrap();
    }
    {
        let _guard = fs::FileLock::exclusive(&lock_path, Duration::from_secs(1)).unwrap();
        fs::write_string_atomic(&data_path, "revision: 2\n").unwrap();
    }

    assert_eq!(std::fs::read_to_string(&data_path).unwrap(), "revision: 2\n");
}

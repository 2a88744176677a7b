use dmxp_transport::ffi::*;
use dmxp_transport::Transport::{SendConfig, SendService};
use serial_test::serial;
use std::ffi::CString;
use std::io::Write;
use std::ptr;

#[test]
fn test_null_arguments() {
    unsafe {
        assert!(dmxp_client_new(ptr::null(), 0).is_null());
        assert_eq!(
            dmxp_client_send(ptr::null_mut(), 1, ptr::null(), 0),
            DMXP_ERROR_NULL_POINTER
        );
        dmxp_client_free(ptr::null_mut());

        let missing = CString::new("/nonexistent/dmxp-send.toml").unwrap();
        assert!(dmxp_client_new(missing.as_ptr(), 0).is_null());
    }
}

#[test]
#[serial]
fn test_client_through_c_api() {
    let dir = tempfile::tempdir().unwrap();
    let conf_path = dir.path().join("send.toml");
    let mut file = std::fs::File::create(&conf_path).unwrap();
    writeln!(
        file,
        "name = \"ffi-{}\"\ncmd_dir = {:?}\n\n[sendq]\nmax = 2\nsize = 256",
        std::process::id(),
        dir.path().to_str().unwrap()
    )
    .unwrap();

    let conf = SendConfig::from_file(&conf_path).unwrap();
    let _service = SendService::init(conf).unwrap();

    let path = CString::new(conf_path.to_str().unwrap()).unwrap();
    unsafe {
        let handle = dmxp_client_new(path.as_ptr(), 0);
        assert!(!handle.is_null());

        let body = b"from C";
        assert_eq!(
            dmxp_client_send(handle, 3, body.as_ptr(), body.len()),
            DMXP_SUCCESS
        );
        assert_eq!(dmxp_client_send(handle, 3, ptr::null(), 0), DMXP_SUCCESS);
        assert_eq!(
            dmxp_client_send(handle, 3, ptr::null(), 4),
            DMXP_ERROR_INVALID_ARG
        );
        assert_eq!(
            dmxp_client_send(handle, 255, body.as_ptr(), body.len()),
            DMXP_ERROR_BAD_TYPE
        );
        let big = vec![0u8; 1024];
        assert_eq!(
            dmxp_client_send(handle, 3, big.as_ptr(), big.len()),
            DMXP_ERROR_TOO_LARGE
        );
        // Nobody drains the queue
        assert_eq!(
            dmxp_client_send(handle, 3, body.as_ptr(), body.len()),
            DMXP_ERROR_QUEUE_FULL
        );

        dmxp_client_free(handle);
    }
}

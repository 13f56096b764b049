//! Software-path integration tests.
//!
//! No accelerator driver is installed in this test binary, so pool init
//! backs out into NO_HW and every call exercises the fallback routing.

use quartzip_core::{Session, SessionParams, Status, get_defaults, max_compressed_length,
    set_defaults};

fn round_trip(data: &[u8]) -> (Session, Vec<u8>) {
    let mut sess = Session::new();
    let mut framed = vec![0u8; max_compressed_length(data.len()).max(64)];
    let out = sess.compress(data, &mut framed, true);
    assert_eq!(out.status, Status::Ok);
    assert_eq!(out.consumed, data.len());
    framed.truncate(out.produced);
    (sess, framed)
}

#[test]
fn small_input_round_trips_through_software() {
    // Below input_sz_thrshold (1024), so software regardless of hardware.
    let data = b"hello";
    let (mut sess, framed) = round_trip(data);
    assert!(framed.len() > data.len()); // framing dominates tiny inputs

    let mut back = vec![0u8; data.len()];
    let rt = sess.decompress(&framed, &mut back);
    assert_eq!(rt.status, Status::Ok);
    assert_eq!(rt.produced, data.len());
    assert_eq!(&back, data);
    assert_eq!(sess.total_in(), framed.len() as u64);
    assert_eq!(sess.total_out(), data.len() as u64);
}

#[test]
fn large_input_round_trips_without_hardware() {
    let data: Vec<u8> = (0u32..300_000).map(|i| (i % 251) as u8).collect();
    let (mut sess, framed) = round_trip(&data);

    let mut back = vec![0u8; data.len()];
    let rt = sess.decompress(&framed, &mut back);
    assert_eq!(rt.status, Status::Ok);
    assert_eq!(rt.produced, data.len());
    assert_eq!(back, data);
}

#[test]
fn compressed_size_respects_max_compressed_length() {
    let data: Vec<u8> = (0u32..200_000).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
    let (_, framed) = round_trip(&data);
    assert!(framed.len() <= max_compressed_length(data.len()));
}

#[test]
fn zero_length_input_is_ok_and_empty() {
    let mut sess = Session::new();
    let mut dest = vec![0u8; 64];
    let out = sess.compress(&[], &mut dest, true);
    assert_eq!(out.status, Status::Ok);
    assert_eq!(out.produced, 0);

    let out = sess.decompress(&[], &mut dest);
    assert_eq!(out.status, Status::Ok);
    assert_eq!(out.produced, 0);
}

#[test]
fn crc_sink_reports_input_crc() {
    let data: Vec<u8> = (0u32..50_000).map(|i| (i * 13 % 256) as u8).collect();
    let mut sess = Session::new();
    let mut framed = vec![0u8; max_compressed_length(data.len())];
    let mut crc = 0u32;
    let out = sess.compress_with_crc(&data, &mut framed, true, &mut crc);
    assert_eq!(out.status, Status::Ok);
    assert_eq!(crc, quartzip_core::crc32(&data));
}

#[test]
fn standard_gzip_stream_is_decoded() {
    use std::io::Write;
    let data = b"written by a reference gzip implementation".to_vec();
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(6));
    enc.write_all(&data).unwrap();
    let stream = enc.finish().unwrap();

    let mut sess = Session::new();
    let mut back = vec![0u8; data.len()];
    let out = sess.decompress(&stream, &mut back);
    assert_eq!(out.status, Status::Ok);
    assert_eq!(out.consumed, stream.len());
    assert_eq!(out.produced, data.len());
    assert_eq!(back, data);
}

#[test]
fn no_hardware_without_backup_is_deterministic() {
    let mut params = SessionParams::default();
    params.sw_backup = false;

    let mut sess = Session::new();
    // The compress call runs init itself and must fail the same way
    // every time, whatever verdict setup saw.
    let _ = sess.setup(Some(&params));

    let data = vec![b'x'; 4096];
    let mut dest = vec![0u8; max_compressed_length(data.len())];
    for _ in 0..3 {
        let out = sess.compress(&data, &mut dest, true);
        assert_eq!(out.status, Status::NoswNoHw);
        assert_eq!(out.produced, 0);
    }

    // The configuration surface stays functional regardless.
    let defaults = get_defaults();
    assert_eq!(set_defaults(&defaults), Status::Ok);
    assert!(max_compressed_length(4096) > 0);
}

#[test]
fn out_of_range_params_are_rejected() {
    let mut sess = Session::new();

    let mut p = SessionParams::default();
    p.comp_lvl = 0;
    assert_eq!(sess.setup(Some(&p)), Status::Params);

    let mut p = SessionParams::default();
    p.hw_buff_sz = 3 * 1024; // not a power of two
    assert_eq!(sess.setup(Some(&p)), Status::Params);

    let mut p = SessionParams::default();
    p.req_cnt_thrshold = 0;
    assert_eq!(sess.setup(Some(&p)), Status::Params);

    assert_eq!(set_defaults(&p), Status::Params);
}

#[test]
fn undersized_destination_reports_buf_error_and_session_survives() {
    let data = vec![0u8; 8192];
    let mut sess = Session::new();
    let mut tiny = vec![0u8; 16];
    let out = sess.compress(&data, &mut tiny, true);
    assert_eq!(out.status, Status::BufError);

    // The session remains usable.
    let small = b"still alive";
    let mut framed = vec![0u8; max_compressed_length(small.len()).max(64)];
    let out = sess.compress(small, &mut framed, true);
    assert_eq!(out.status, Status::Ok);
}

#[test]
fn level_nine_compresses_in_software() {
    let mut params = SessionParams::default();
    params.comp_lvl = 9;
    let mut sess = Session::new();
    let rc = sess.setup(Some(&params));
    assert!(rc == Status::Ok || rc == Status::NoHw);

    let data: Vec<u8> = (0u32..40_000).map(|i| (i % 17) as u8).collect();
    let mut framed = vec![0u8; max_compressed_length(data.len())];
    let out = sess.compress(&data, &mut framed, true);
    assert_eq!(out.status, Status::Ok);

    let mut back = vec![0u8; data.len()];
    let rt = sess.decompress(&framed[..out.produced], &mut back);
    assert_eq!(rt.status, Status::Ok);
    assert_eq!(back, data);
}

//! End-to-end scenarios driving the built `tilesim` binary over small
//! descriptors.

use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_case(tag: &str) -> (PathBuf, PathBuf) {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("tilesim-cli-{tag}-{nonce}"));
    let out = dir.join("out");
    std::fs::create_dir_all(&out).expect("Failed to create temp dirs");
    (dir, out)
}

fn run_case(tag: &str, descriptor: &str, extra_args: &[&str]) -> (PathBuf, std::process::Output) {
    let (dir, out) = temp_case(tag);
    let desc_path = dir.join("case.json");
    std::fs::write(&desc_path, descriptor).expect("Failed to write descriptor");

    let output = Command::new(env!("CARGO_BIN_EXE_tilesim"))
        .args([
            "-i",
            desc_path.to_str().unwrap(),
            "-c",
            &format!("{tag}.json"),
            "-o",
            out.to_str().unwrap(),
        ])
        .args(extra_args)
        .output()
        .expect("Failed to execute tilesim");
    (out, output)
}

#[test]
fn echo_core_round_trips_through_the_binary() {
    let descriptor = r#"{
        "chips": [{"x": 0, "y": 0, "cores": [{"x": 0, "y": 0, "pi_groups": [{
            "axon": {
                "pic": 3,
                "constant_b": 1,
                "n_branch": 1,
                "nif": 4,
                "data_blocks": [
                    {"id": "x1", "start": 0, "data": [1, 2, 3, 4]},
                    {"id": "x2", "start": 4, "data": [1, 1, 1, 1]},
                    {"id": "echo_out", "start": 16, "direction_out": true}
                ]
            }
        }]}]}]
    }"#;
    let (out, output) = run_case("echo", descriptor, &[]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("case echo  running time"), "{stdout}");

    let text = std::fs::read_to_string(out.join("echo_out.hex")).unwrap();
    assert_eq!(text, "00000002\n00000003\n00000004\n00000005\n");
    let _ = std::fs::remove_dir_all(out.parent().unwrap());
}

#[test]
fn unicast_lands_in_receiver_memory() {
    // S2: core (0,0) ships one single-pack word to core (1,0).
    let descriptor = r#"{
        "chips": [{"x": 0, "y": 0, "cores": [
            {"x": 0, "y": 0, "pi_groups": [{
                "router": {
                    "pic": 9,
                    "send_en": true,
                    "data_blocks": [
                        {"start": 0, "A": 256, "X": 1, "Y": 0, "P": 1},
                        {"id": "pay", "start": 1, "length": 1, "data": [-559038737]}
                    ]
                }
            }]},
            {"x": 1, "y": 0, "pi_groups": [{
                "router": {
                    "pic": 9,
                    "recv_en": true,
                    "recv_address": 256,
                    "din_length": 64,
                    "output_seg": {"start": 256, "length": 1}
                }
            }]}
        ]}]
    }"#;
    let (out, output) = run_case("unicast", descriptor, &[]);
    assert!(output.status.success(), "{output:?}");
    // offset 256 wraps the 256-byte ring: payload lands at the ring base
    let text = std::fs::read_to_string(out.join("seg_000100.hex")).unwrap();
    assert_eq!(text, "deadbeef\n");
    let _ = std::fs::remove_dir_all(out.parent().unwrap());
}

#[test]
fn relay_forwards_to_third_core() {
    // S4: (0,0) sends with the relay flag; (1,0) relays one hop right;
    // (2,0) receives.
    let descriptor = r#"{
        "chips": [{"x": 0, "y": 0, "cores": [
            {"x": 0, "y": 0, "pi_groups": [{
                "router": {
                    "pic": 9,
                    "send_en": true,
                    "data_blocks": [
                        {"start": 0, "A": 8, "X": 1, "Y": 0, "P": 1, "Q": 1},
                        {"id": "pay", "start": 1, "length": 1, "data": [85]}
                    ]
                }
            }]},
            {"x": 1, "y": 0, "pi_groups": [{
                "router": {
                    "pic": 9,
                    "multicast_relay_or_not": 2,
                    "relay_packets_num": 0,
                    "dx": 1,
                    "dy": 0
                }
            }]},
            {"x": 2, "y": 0, "pi_groups": [{
                "router": {
                    "pic": 9,
                    "recv_en": true,
                    "recv_address": 128,
                    "din_length": 64,
                    "output_seg": {"start": 130, "length": 1}
                }
            }]}
        ]}]
    }"#;
    let (out, output) = run_case("relay", descriptor, &[]);
    assert!(output.status.success(), "{output:?}");
    // offset 8 into the ring: byte 8 past the base, i.e. word 130
    let text = std::fs::read_to_string(out.join("seg_000082.hex")).unwrap();
    assert_eq!(text, "00000055\n");
    let _ = std::fs::remove_dir_all(out.parent().unwrap());
}

#[test]
fn multicast_burst_of_three() {
    // S3: one advanced header fans three 8-byte packets into the receiver.
    let descriptor = r#"{
        "chips": [{"x": 0, "y": 0, "cores": [
            {"x": 0, "y": 0, "pi_groups": [{
                "router": {
                    "pic": 9,
                    "send_en": true,
                    "header_multipack": 1,
                    "data_blocks": [
                        {"start": 0, "A": 2, "X": 1, "Y": 0, "T": 1, "P": 1,
                         "EN": 1, "pack_per_Rhead": 2, "A_offset": 0, "Const": 0},
                        {"id": "b0", "start": 2, "length": 2, "data": [17, 18]},
                        {"id": "b1", "start": 4, "length": 2, "data": [19, 20]},
                        {"id": "b2", "start": 6, "length": 2, "data": [21, 22]}
                    ]
                }
            }]},
            {"x": 1, "y": 0, "pi_groups": [{
                "router": {
                    "pic": 9,
                    "recv_en": true,
                    "header_multipack": 1,
                    "recv_address": 256,
                    "din_length": 64,
                    "output_seg": {"start": 260, "length": 6}
                }
            }]}
        ]}]
    }"#;
    let (out, output) = run_case("multicast", descriptor, &[]);
    assert!(output.status.success(), "{output:?}");
    // bursts land at recv + A*8: word 260, six consecutive words
    let text = std::fs::read_to_string(out.join("seg_000104.hex")).unwrap();
    assert_eq!(
        text,
        "00000011\n00000012\n00000013\n00000014\n00000015\n00000016\n"
    );
    let _ = std::fs::remove_dir_all(out.parent().unwrap());
}

#[test]
fn streamer_round_trip() {
    // S6: a dynamic input block flows in from the stub streamer, through a
    // block move, out through the NoC to the FPGA and back to the stub.
    let mut stub = tilesim_streamer_fixture::StubStreamer::bind(0).unwrap();
    let input: Vec<u8> = (0u8..64).collect();
    stub.add_input("din", input.clone());
    let outputs = stub.outputs();
    let port = stub.port();
    stub.serve();

    let descriptor = r#"{
        "test_mode": "case_output",
        "chips": [{"x": 0, "y": 0, "cores": [{"x": 0, "y": 0, "pi_groups": [{
            "soma1": {
                "pic": 6,
                "length_in": 16,
                "length_out": 16,
                "num_in": 1,
                "num_out": 1,
                "data_blocks": [
                    {"id": "din", "start": 16, "length": 16},
                    {"id": "staged", "start": 4096, "direction_out": true, "print_length": 0}
                ]
            },
            "router": {
                "pic": 9,
                "send_en": true,
                "header_multipack": 1,
                "data_blocks": [
                    {"start": 0, "A": 32, "X": -16, "Y": 0, "T": 1, "P": 1,
                     "EN": 1, "pack_per_Rhead": 7, "A_offset": 0, "Const": 0},
                    {"id": "p0", "start": 4096, "length": 2},
                    {"id": "p1", "start": 4098, "length": 2},
                    {"id": "p2", "start": 4100, "length": 2},
                    {"id": "p3", "start": 4102, "length": 2},
                    {"id": "p4", "start": 4104, "length": 2},
                    {"id": "p5", "start": 4106, "length": 2},
                    {"id": "p6", "start": 4108, "length": 2},
                    {"id": "p7", "start": 4110, "length": 2}
                ]
            }
        }]}]}],
        "dynamic_blocks": [
            {"id": "din", "chip_x": 0, "chip_y": 0, "core_x": 0, "core_y": 0,
             "io_type": "dynamic_input", "start_addr": 16, "length": 16, "phases": [0]},
            {"id": "dout", "chip_x": 0, "chip_y": 0, "core_x": 0, "core_y": 0,
             "io_type": "output_data", "start_addr": 32, "length": 16, "phases": [1]}
        ]
    }"#;
    let (_out, output) = run_case(
        "stream",
        descriptor,
        &["--streamer-port", &port.to_string()],
    );
    assert!(output.status.success(), "{output:?}");

    let outputs = outputs.lock().unwrap();
    assert_eq!(outputs.get("dout"), Some(&input));
}

#[test]
fn malformed_descriptor_exits_nonzero() {
    let (_out, output) = run_case("broken", "{ not json", &[]);
    assert!(!output.status.success());
}

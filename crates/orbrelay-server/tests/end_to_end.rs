//! End-to-end scenarios exercising a running [`Supervisor`] over real TCP
//! listeners and a real filesystem, matching the scenarios in the
//! specification's testable-properties section: local ingest, garbage
//! rejection, unknown request handling, and mirror materialization
//! (including the miss case).

use std::{io::Write, net::TcpListener as StdTcpListener, time::Duration};

use chrono::Utc;
use orbrelay_proto::{encode_timecode, Envelope, Message, RequestKind, LINE_SIZE};
use orbrelay_server::{HostConfig, StationConfig, Supervisor};
use tokio::{io::AsyncReadExt, net::TcpStream};

fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn valid_frame(satellite_code: u8, day: u16, msecs: u32) -> Vec<u8> {
    let mut frame = vec![0u8; LINE_SIZE];
    let frame_sync: [u16; 6] = [644, 367, 860, 413, 527, 149];
    for (i, word) in frame_sync.iter().enumerate() {
        frame[i * 2..i * 2 + 2].copy_from_slice(&word.to_be_bytes());
    }
    let id_word = u16::from(satellite_code) << 3;
    frame[12..14].copy_from_slice(&id_word.to_be_bytes());
    for (i, word) in encode_timecode(day, msecs).iter().enumerate() {
        frame[16 + i * 2..16 + i * 2 + 2].copy_from_slice(&word.to_be_bytes());
    }
    frame
}

/// Reads exactly one envelope off a raw socket, mirroring the server's own
/// internal framing (this test acts as a bare client, not using the
/// server's private `wire` module).
async fn read_one(stream: &mut TcpStream) -> Envelope {
    let mut header_len_buf = [0u8; 4];
    stream.read_exact(&mut header_len_buf).await.unwrap();
    let header_len = u32::from_be_bytes(header_len_buf) as usize;
    let mut header = vec![0u8; header_len];
    stream.read_exact(&mut header).await.unwrap();

    let mut payload_len_buf = [0u8; 4];
    stream.read_exact(&mut payload_len_buf).await.unwrap();
    let payload_len = u32::from_be_bytes(payload_len_buf) as usize;
    let mut payload = vec![0u8; payload_len];
    stream.read_exact(&mut payload).await.unwrap();

    let mut full = Vec::new();
    full.extend_from_slice(&header_len_buf);
    full.extend_from_slice(&header);
    full.extend_from_slice(&payload_len_buf);
    full.extend_from_slice(&payload);
    Envelope::decode(&full).unwrap()
}

async fn write_one(stream: &mut TcpStream, envelope: &Envelope) {
    use tokio::io::AsyncWriteExt;
    stream.write_all(&envelope.encode().unwrap()).await.unwrap();
}

fn write_station_ini(
    path: &std::path::Path,
    station: &str,
    data_dir: &std::path::Path,
    pubport: u16,
    reqport: u16,
    mirror: Option<&HostConfig>,
) {
    let mut contents = format!(
        "[local_reception]\nstation = {station}\nlocalhost = {station}\ndata_dir = {}\nfile_pattern = *.hrpt\n",
        data_dir.display()
    );
    if mirror.is_some() {
        contents.push_str("mirror = peer\n");
    }
    contents.push_str(&format!("\n[{station}]\nhostname = 127.0.0.1\npubport = {pubport}\nreqport = {reqport}\n"));
    if let Some(mirror) = mirror {
        contents.push_str(&format!(
            "\n[peer]\nhostname = {}\npubport = {}\nreqport = {}\n",
            mirror.hostname, mirror.pubport, mirror.reqport
        ));
    }
    std::fs::File::create(path).unwrap().write_all(contents.as_bytes()).unwrap();
}

#[tokio::test]
async fn local_ingest_announces_and_serves_the_scanline() {
    let data_dir = tempfile::tempdir().unwrap();
    let config_path = data_dir.path().join("station.ini");
    let pubport = free_port();
    let reqport = free_port();
    write_station_ini(&config_path, "station1", data_dir.path(), pubport, reqport, None);

    let config = StationConfig::load(&config_path).unwrap();
    let supervisor = Supervisor::start(config).await.unwrap();

    // Give the publisher's accept loop and the request manager's listener a
    // moment to come up before anyone connects.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut subscriber = TcpStream::connect(("127.0.0.1", pubport)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let file_path = data_dir.path().join("a.hrpt");
    std::fs::File::create(&file_path).unwrap().write_all(&valid_frame(7, 180, 43_200_000)).unwrap();

    let have = tokio::time::timeout(Duration::from_secs(5), read_one(&mut subscriber)).await.unwrap();
    let (satellite, utctime) = match have.message {
        Message::Have(data) => (data.satellite, data.timecode),
        other => panic!("expected Have, got {other:?}"),
    };
    assert_eq!(satellite, "NOAA 15");

    let mut client = TcpStream::connect(("127.0.0.1", reqport)).await.unwrap();
    let request = Envelope::new(
        "/oper/polar/direct_readout/station1",
        "client",
        Utc::now(),
        Message::Request(RequestKind::Scanline { satellite: satellite.clone(), utctime }),
    );
    write_one(&mut client, &request).await;
    let reply = read_one(&mut client).await;
    match reply.message {
        Message::Scanline(bytes) => assert_eq!(bytes.len(), LINE_SIZE),
        other => panic!("expected Scanline, got {other:?}"),
    }

    supervisor.stop().await;
}

#[tokio::test]
async fn garbage_frame_is_skipped_but_does_not_block_later_valid_frames() {
    let data_dir = tempfile::tempdir().unwrap();
    let config_path = data_dir.path().join("station.ini");
    let pubport = free_port();
    let reqport = free_port();
    write_station_ini(&config_path, "station1", data_dir.path(), pubport, reqport, None);

    let config = StationConfig::load(&config_path).unwrap();
    let supervisor = Supervisor::start(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let file_path = data_dir.path().join("a.hrpt");
    std::fs::File::create(&file_path).unwrap().write_all(&vec![0u8; LINE_SIZE]).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.holder().satellite_count(), 0);

    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&file_path).unwrap();
        file.write_all(&valid_frame(7, 180, 43_200_000)).unwrap();
    }

    for _ in 0..50 {
        if supervisor.holder().satellite_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(supervisor.holder().satellites(), vec!["NOAA 15".to_string()]);

    supervisor.stop().await;
}

#[tokio::test]
async fn unknown_request_type_is_answered_with_unknown_and_server_keeps_serving() {
    let data_dir = tempfile::tempdir().unwrap();
    let config_path = data_dir.path().join("station.ini");
    let pubport = free_port();
    let reqport = free_port();
    write_station_ini(&config_path, "station1", data_dir.path(), pubport, reqport, None);

    let config = StationConfig::load(&config_path).unwrap();
    let supervisor = Supervisor::start(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(("127.0.0.1", reqport)).await.unwrap();
    let request = Envelope::new(
        "/oper/polar/direct_readout/station1",
        "client",
        Utc::now(),
        Message::Heartbeat(orbrelay_proto::HeartbeatData { addr: "nobody:0".to_string(), next_pass_time: "unknown".to_string() }),
    );
    write_one(&mut client, &request).await;
    let reply = read_one(&mut client).await;
    assert_eq!(reply.message, Message::Unknown);

    // Server continues to serve subsequent requests on a fresh connection.
    let mut client2 = TcpStream::connect(("127.0.0.1", reqport)).await.unwrap();
    let ping = Envelope::new("/oper/polar/direct_readout/station1", "client", Utc::now(), Message::Ping);
    write_one(&mut client2, &ping).await;
    let reply2 = read_one(&mut client2).await;
    match reply2.message {
        Message::Pong(data) => assert_eq!(data.station, "station1"),
        other => panic!("expected Pong, got {other:?}"),
    }

    supervisor.stop().await;
}

#[tokio::test]
async fn mirror_materializes_peer_scanline_byte_identically() {
    let p1_dir = tempfile::tempdir().unwrap();
    let p1_config_path = p1_dir.path().join("station.ini");
    let p1_pubport = free_port();
    let p1_reqport = free_port();
    write_station_ini(&p1_config_path, "p1", p1_dir.path(), p1_pubport, p1_reqport, None);
    let p1_config = StationConfig::load(&p1_config_path).unwrap();
    let p1 = Supervisor::start(p1_config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let file_path = p1_dir.path().join("a.hrpt");
    std::fs::File::create(&file_path).unwrap().write_all(&valid_frame(7, 180, 43_200_000)).unwrap();
    for _ in 0..50 {
        if p1.holder().satellite_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let ts = p1.holder().timestamps_for("NOAA 15")[0];
    let expected_bytes = p1.holder().get_data("NOAA 15", ts).await.unwrap();

    let p2_dir = tempfile::tempdir().unwrap();
    let p2_config_path = p2_dir.path().join("station.ini");
    let p2_pubport = free_port();
    let p2_reqport = free_port();
    let peer = HostConfig { hostname: "127.0.0.1".to_string(), pubport: p1_pubport, reqport: p1_reqport };
    write_station_ini(&p2_config_path, "p2", p2_dir.path(), p2_pubport, p2_reqport, Some(&peer));
    let p2_config = StationConfig::load(&p2_config_path).unwrap();
    let p2 = Supervisor::start(p2_config).await.unwrap();

    for _ in 0..100 {
        if p2.holder().get("NOAA 15", ts).is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mirrored = p2.holder().get_data("NOAA 15", ts).await.unwrap();
    assert_eq!(mirrored, expected_bytes);

    p2.stop().await;
    p1.stop().await;
}

#[tokio::test]
async fn mirror_request_after_peer_eviction_reports_missing() {
    let p1_dir = tempfile::tempdir().unwrap();
    let p1_config_path = p1_dir.path().join("station.ini");
    let p1_pubport = free_port();
    let p1_reqport = free_port();
    write_station_ini(&p1_config_path, "p1", p1_dir.path(), p1_pubport, p1_reqport, None);
    let p1_config = StationConfig::load(&p1_config_path).unwrap();
    let p1 = Supervisor::start(p1_config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let file_path = p1_dir.path().join("a.hrpt");
    std::fs::File::create(&file_path).unwrap().write_all(&valid_frame(7, 180, 43_200_000)).unwrap();
    for _ in 0..50 {
        if p1.holder().satellite_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let ts = p1.holder().timestamps_for("NOAA 15")[0];

    let p2_dir = tempfile::tempdir().unwrap();
    let p2_config_path = p2_dir.path().join("station.ini");
    let p2_pubport = free_port();
    let p2_reqport = free_port();
    let peer = HostConfig { hostname: "127.0.0.1".to_string(), pubport: p1_pubport, reqport: p1_reqport };
    write_station_ini(&p2_config_path, "p2", p2_dir.path(), p2_pubport, p2_reqport, Some(&peer));
    let p2_config = StationConfig::load(&p2_config_path).unwrap();
    let p2 = Supervisor::start(p2_config).await.unwrap();

    for _ in 0..100 {
        if p2.holder().get("NOAA 15", ts).is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Evict from the origin before the lazy reference on p2 ever
    // materializes the bytes.
    p1.holder().delete("NOAA 15", ts);

    let result = p2.holder().get_data("NOAA 15", ts).await;
    assert!(matches!(result, Err(error) if error.is_remote_failure()));

    p2.stop().await;
    p1.stop().await;
}

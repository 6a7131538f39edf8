use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use vigil::{ChannelKind, ChannelOutcome, FanOut, NotificationConfig};

/// Accepts connections and never answers.
fn silent_server() -> (String, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/hook", listener.local_addr().unwrap());
    (url, listener)
}

/// Answers one request with a WeCom-style success body.
fn wecom_server() -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/cgi-bin/webhook/send", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.trim_end().is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();
        let reply = r#"{"errcode":0,"errmsg":"ok"}"#;
        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.len(),
            reply
        )
        .unwrap();
        String::from_utf8(body).unwrap()
    });
    (url, handle)
}

#[test]
fn timed_out_channel_does_not_prevent_the_others() {
    let (feishu_url, _silent) = silent_server();
    let (wecom_url, wecom) = wecom_server();
    let config = NotificationConfig {
        feishu_webhook: Some(feishu_url),
        wechat_webhook: Some(wecom_url),
        sms_phone: Some("13800000000".to_string()),
        sms_api_key: Some("sms-key".to_string()),
        timeout_secs: 1,
        ..NotificationConfig::default()
    };

    let started = Instant::now();
    let results = FanOut::from_config(&config).dispatch("[Person detection alert] lobby");
    assert!(started.elapsed() < Duration::from_secs(8));

    let outcomes: Vec<(ChannelKind, &ChannelOutcome)> = results
        .iter()
        .map(|result| (result.channel, &result.outcome))
        .collect();
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes[0].0, ChannelKind::Feishu);
    assert!(matches!(outcomes[0].1, ChannelOutcome::Failed(_)));
    assert_eq!(outcomes[1], (ChannelKind::WeCom, &ChannelOutcome::Delivered));
    assert_eq!(outcomes[2], (ChannelKind::Sms, &ChannelOutcome::Delivered));
    assert_eq!(outcomes[3], (ChannelKind::Email, &ChannelOutcome::Skipped));

    let request: serde_json::Value = serde_json::from_str(&wecom.join().unwrap()).unwrap();
    assert_eq!(request["msgtype"], "text");
    assert_eq!(request["text"]["content"], "[Person detection alert] lobby");
}

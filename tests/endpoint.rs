//! End-to-end: HTTP upgrade into a manager-driven echo endpoint.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use wscore::{Frame, ListenableManager, OpCode, SimpleManager, UpgradeRequest, Upgrader};

const REQUEST_HEAD: &[u8] = b"GET /chat HTTP/1.1\r\n\
    Host: server.example.com\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\
    \r\n";

fn client_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Frame::new(fin, opcode, payload.to_vec());
    frame.mask = Some([0, 0, 0, 0]);
    frame.encode()
}

async fn read_until_blank_line(client: &mut DuplexStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        client.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[tokio::test]
async fn upgrade_then_echo_with_simple_manager() {
    let manager: SimpleManager<DuplexStream> = SimpleManager::new(Box::new(|conn| {
        Box::pin(async move {
            while let Some(message) = conn.read_message().await? {
                conn.write_message(message).await?;
            }
            Ok(())
        })
    }));
    let upgrader = Upgrader::new(manager);

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let request = UpgradeRequest::parse(REQUEST_HEAD).unwrap();
    let serve = upgrader.upgrade(&request, server);

    let drive = async {
        let head = read_until_blank_line(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        client
            .write_all(&client_frame(true, OpCode::Text, b"echo me"))
            .await
            .unwrap();
        let mut reply = vec![0u8; 9];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x81, 0x07, 0x65, 0x63, 0x68, 0x6f, 0x20, 0x6d, 0x65]);

        client
            .write_all(&client_frame(true, OpCode::Close, &1000u16.to_be_bytes()))
            .await
            .unwrap();
        let mut close_reply = vec![0u8; 4];
        client.read_exact(&mut close_reply).await.unwrap();
        assert_eq!(close_reply, [0x88, 0x02, 0x03, 0xe8]);
    };

    let (served, ()) = tokio::join!(serve, drive);
    served.unwrap();
}

#[tokio::test]
async fn upgrade_then_listen_with_deflate() {
    let manager: ListenableManager<DuplexStream> =
        ListenableManager::new().on_message(Box::new(|conn, message| {
            let message = message.clone();
            Box::pin(async move { conn.write_message(message).await })
        }));
    let upgrader = Upgrader::new(manager);

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let request = UpgradeRequest::parse(REQUEST_HEAD)
        .unwrap()
        .with_header("Sec-WebSocket-Extensions", "permessage-deflate");
    let serve = upgrader.upgrade(&request, server);

    let drive = async {
        let head = read_until_blank_line(&mut client).await;
        assert!(head.contains(
            "Sec-WebSocket-Extensions: permessage-deflate; server_no_context_takeover; client_no_context_takeover\r\n"
        ));

        // The endpoint negotiated compression, so data frames travel
        // deflated with RSV1 set.
        let mut frame = Frame::text(wscore::extensions::deflate(b"over the wire").unwrap());
        frame.rsv1 = true;
        frame.mask = Some([0, 0, 0, 0]);
        client.write_all(&frame.encode()).await.unwrap();

        let mut reply = vec![0u8; 256];
        let n = client.read(&mut reply).await.unwrap();
        let (echoed, _) = Frame::decode(&reply[..n]).unwrap();
        assert!(echoed.rsv1);
        assert_eq!(
            wscore::extensions::inflate(&echoed.payload).unwrap(),
            b"over the wire"
        );

        client
            .write_all(&client_frame(true, OpCode::Close, &1000u16.to_be_bytes()))
            .await
            .unwrap();
        let mut close_reply = vec![0u8; 4];
        client.read_exact(&mut close_reply).await.unwrap();
    };

    let (served, ()) = tokio::join!(serve, drive);
    served.unwrap();
}

#[tokio::test]
async fn upgrade_rejection_reaches_the_wire() {
    let manager: SimpleManager<DuplexStream> =
        SimpleManager::new(Box::new(|_conn| Box::pin(async { Ok(()) })));
    let upgrader = Upgrader::new(manager);

    let (mut client, server) = tokio::io::duplex(4096);
    let request = UpgradeRequest::new("GET")
        .with_header("Connection", "Upgrade")
        .with_header("Upgrade", "h2c");

    let err = upgrader.upgrade(&request, server).await.unwrap_err();
    assert!(matches!(err, wscore::Error::Handshake { status: 400, .. }));

    let mut buf = vec![0u8; 512];
    let n = client.read(&mut buf).await.unwrap();
    let response = String::from_utf8(buf[..n].to_vec()).unwrap();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("cannot be upgraded to 'h2c'"));
}

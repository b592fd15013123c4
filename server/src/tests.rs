#[cfg(test)]
mod scenarios {
    use crate::coordinator::Coordinator;
    use crate::deck::DirCatalog;
    use crate::http;
    use crate::registry::RoomRegistry;
    use futures::{SinkExt, StreamExt};
    use mukatte_protocol::*;
    use reqwest::{header, StatusCode, Url};
    use std::{net::SocketAddr, sync::Arc, time::Duration};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{self, client::IntoClientRequest, http::HeaderValue, Message},
        MaybeTlsStream, WebSocketStream,
    };

    type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// A real server on an ephemeral port, dealing from a temp asset directory.
    struct TestServer {
        addr: SocketAddr,
        coordinator: Coordinator,
        client: reqwest::Client,
        _assets: tempfile::TempDir,
    }

    async fn spawn_server() -> TestServer {
        let assets = tempfile::tempdir().unwrap();
        for i in 0..32 {
            std::fs::write(assets.path().join(format!("carta{i:02}.jpg")), b"jpg").unwrap();
        }
        let registry = Arc::new(RoomRegistry::new(Arc::new(DirCatalog::new(assets.path()))));
        let coordinator = Coordinator::new(registry, Duration::from_secs(30));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = http::router(coordinator.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            coordinator,
            client: reqwest::Client::new(),
            _assets: assets,
        }
    }

    fn cookie(id: &Identity) -> String {
        format!("{SESSION_COOKIE}={id}")
    }

    impl TestServer {
        async fn join(&self, room: &str, id: &Identity) -> reqwest::Response {
            self.client
                .get(format!("http://{}/", self.addr))
                .query(&[(ROOM_PARAM, room)])
                .header(header::COOKIE, cookie(id))
                .send()
                .await
                .unwrap()
        }

        async fn leave(&self, id: &Identity) -> reqwest::Response {
            self.client
                .get(format!("http://{}/", self.addr))
                .query(&[(DELETE_PARAM, "yes")])
                .header(header::COOKIE, cookie(id))
                .send()
                .await
                .unwrap()
        }

        async fn connect(&self, room: &str, id: &Identity) -> Result<Ws, tungstenite::Error> {
            let mut url = Url::parse(&format!("ws://{}{STATUS_PATH}", self.addr)).unwrap();
            url.query_pairs_mut().append_pair(ROOM_PARAM, room);
            let mut req = url.as_str().into_client_request().unwrap();
            req.headers_mut()
                .insert("cookie", HeaderValue::from_str(&cookie(id)).unwrap());
            connect_async(req).await.map(|(ws, _)| ws)
        }
    }

    async fn send(ws: &mut Ws, payload: &[u8]) {
        ws.send(Message::Text(encode_payload(payload))).await.unwrap();
    }

    /// Next relayed payload, or `None` on close, error or a quiet line.
    async fn next_payload(ws: &mut Ws) -> Option<Vec<u8>> {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => return Some(decode_payload(&text).unwrap()),
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                _ => return None,
            }
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn two_players_share_a_board_and_the_third_is_refused() {
        let server = spawn_server().await;
        let (a, b, c) = (Identity::generate(), Identity::generate(), Identity::generate());

        let resp = server.join("R", &a).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-frame-options"], "DENY");
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
        let view_a: JoinResponse = resp.json().await.unwrap();
        assert_eq!(view_a.images.len(), CARD_SET_SIZE);
        assert!(view_a.images.contains(&view_a.your_card));

        let view_b: JoinResponse = server.join("R", &b).await.json().await.unwrap();
        assert_eq!(view_b.images, view_a.images);
        assert!(view_b.images.contains(&view_b.your_card));

        assert_eq!(server.join("R", &c).await.status(), StatusCode::CONFLICT);

        // refreshing keeps the same secret card
        for _ in 0..5 {
            let again: JoinResponse = server.join("R", &a).await.json().await.unwrap();
            assert_eq!(again, view_a);
        }
    }

    #[tokio::test]
    async fn first_visit_gets_an_identity_cookie() {
        let server = spawn_server().await;
        let resp = server
            .client
            .get(format!("http://{}/?{ROOM_PARAM}=fresh", server.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let set_cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        let token = set_cookie
            .split(';')
            .next()
            .and_then(|kv| kv.strip_prefix(&format!("{SESSION_COOKIE}=")))
            .unwrap();
        let id: Identity = token.parse().unwrap();
        assert_eq!(
            server.coordinator.registry().find_room_by_identity(id).as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn bad_requests_are_rejected_before_touching_rooms() {
        let server = spawn_server().await;
        let resp = server
            .client
            .get(format!("http://{}/?{ROOM_PARAM}=R", server.addr))
            .header(header::COOKIE, format!("{SESSION_COOKIE}=not-a-uuid"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(server.coordinator.registry().room_count(), 0);

        let resp = server
            .client
            .post(format!("http://{}/?{ROOM_PARAM}=R", server.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let resp = server
            .client
            .get(format!("http://{}/", server.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn leave_removes_the_room_and_blocks_later_attaches() {
        let server = spawn_server().await;
        let (a, b) = (Identity::generate(), Identity::generate());
        server.join("R", &a).await;
        server.join("R", &b).await;

        assert_eq!(server.leave(&a).await.status(), StatusCode::OK);
        assert_eq!(server.leave(&a).await.status(), StatusCode::FORBIDDEN);
        assert_eq!(server.coordinator.registry().room_count(), 0);

        match server.connect("R", &b).await {
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status().as_u16(), 400),
            other => panic!("expected a refused upgrade, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn status_without_upgrade_is_a_bad_request() {
        let server = spawn_server().await;
        let a = Identity::generate();
        server.join("R", &a).await;
        let resp = server
            .client
            .get(format!("http://{}{STATUS_PATH}?{ROOM_PARAM}=R", server.addr))
            .header(header::COOKIE, cookie(&a))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn moves_reach_a_peer_that_attaches_late() {
        let server = spawn_server().await;
        let (a, b) = (Identity::generate(), Identity::generate());
        server.join("R", &a).await;
        server.join("R", &b).await;

        let mut wa = server.connect("R", &a).await.unwrap();
        send(&mut wa, b"5").await;
        settle().await;

        let mut wb = server.connect("R", &b).await.unwrap();
        assert_eq!(next_payload(&mut wb).await, Some(b"5".to_vec()));

        for i in 0..20u8 {
            send(&mut wb, &[i]).await;
        }
        for i in 0..20u8 {
            assert_eq!(next_payload(&mut wa).await, Some(vec![i]));
        }
    }

    #[tokio::test]
    async fn rooms_do_not_hear_each_other() {
        let server = spawn_server().await;
        let ids: Vec<Identity> = (0..4).map(|_| Identity::generate()).collect();
        server.join("left", &ids[0]).await;
        server.join("left", &ids[1]).await;
        server.join("right", &ids[2]).await;
        server.join("right", &ids[3]).await;

        let mut l0 = server.connect("left", &ids[0]).await.unwrap();
        let mut l1 = server.connect("left", &ids[1]).await.unwrap();
        let mut r0 = server.connect("right", &ids[2]).await.unwrap();
        let mut r1 = server.connect("right", &ids[3]).await.unwrap();

        send(&mut l0, b"12").await;
        send(&mut r0, b"3").await;
        assert_eq!(next_payload(&mut l1).await, Some(b"12".to_vec()));
        assert_eq!(next_payload(&mut r1).await, Some(b"3".to_vec()));
        assert_eq!(next_payload(&mut l0).await, None);
        assert_eq!(next_payload(&mut r0).await, None);
    }

    #[tokio::test]
    async fn room_names_with_url_metacharacters_stay_intact() {
        let server = spawn_server().await;
        let (a, b) = (Identity::generate(), Identity::generate());
        let room = "sala 7&delete=yes#x";
        server.join(room, &a).await;
        server.join(room, &b).await;
        assert_eq!(
            server.coordinator.registry().find_room_by_identity(a).as_deref(),
            Some(room)
        );

        let mut wa = server.connect(room, &a).await.unwrap();
        let mut wb = server.connect(room, &b).await.unwrap();
        send(&mut wa, b"8").await;
        assert_eq!(next_payload(&mut wb).await, Some(b"8".to_vec()));
    }

    #[tokio::test]
    async fn garbage_frame_drops_only_the_sender() {
        let server = spawn_server().await;
        let (a, b) = (Identity::generate(), Identity::generate());
        server.join("R", &a).await;
        server.join("R", &b).await;

        let mut wa = server.connect("R", &a).await.unwrap();
        let mut wb = server.connect("R", &b).await.unwrap();

        wa.send(Message::Text("%%% not base64".into())).await.unwrap();
        assert_eq!(next_payload(&mut wa).await, None);

        // b's connection and the room are untouched; a catches up after reconnecting
        send(&mut wb, b"after").await;
        settle().await;
        let mut wa = server.connect("R", &a).await.unwrap();
        assert_eq!(next_payload(&mut wa).await, Some(b"after".to_vec()));

        send(&mut wa, b"hi").await;
        assert_eq!(next_payload(&mut wb).await, Some(b"hi".to_vec()));
    }
}

//! Work queue served over TCP to several pulling clients.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use detqa::distribution::{
    spawn_enumerator, DistributionError, RemoteWorkSource, WorkQueueServer, WorkSource,
};
use detqa::image::supplier::ListSupplier;

async fn serve(items: &[&str]) -> (SocketAddr, JoinHandle<Result<(), DistributionError>>) {
    let (handle, _enumerator) = spawn_enumerator(Box::new(ListSupplier::new(items.to_vec())), 4);
    let server = WorkQueueServer::bind("127.0.0.1:0".parse().expect("addr"), handle)
        .await
        .expect("bind");
    let addr = server.local_addr().expect("local addr");
    (addr, tokio::spawn(server.serve()))
}

#[tokio::test]
async fn two_clients_receive_each_item_exactly_once() {
    let (addr, server) = serve(&["x", "y", "z"]).await;
    let mut first = RemoteWorkSource::new(addr);
    let mut second = RemoteWorkSource::new(addr);
    assert_eq!(first.total().await.expect("total"), 3);
    assert_eq!(second.total().await.expect("total"), 3);

    let mut received = Vec::new();
    loop {
        let a = first.next_item().await.expect("next");
        let b = second.next_item().await.expect("next");
        if a.is_none() && b.is_none() {
            break;
        }
        received.extend(a);
        received.extend(b);
    }
    received.sort();
    assert_eq!(received, ["x", "y", "z"]);

    assert_eq!(first.next_item().await.expect("next"), None);
    assert_eq!(second.next_item().await.expect("next"), None);
    server.abort();
}

#[tokio::test]
async fn concurrent_workers_partition_the_work_set() {
    let items: Vec<String> = (0..40).map(|i| format!("item{i:02}")).collect();
    let refs: Vec<&str> = items.iter().map(String::as_str).collect();
    let (addr, server) = serve(&refs).await;

    let mut workers = Vec::new();
    for _ in 0..4 {
        workers.push(tokio::spawn(async move {
            let mut source = RemoteWorkSource::new(addr);
            let mut mine = Vec::new();
            while let Some(item) = source.next_item().await.expect("next") {
                mine.push(item);
            }
            mine
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.expect("join"));
    }
    assert_eq!(all.len(), 40, "no item handed out twice");
    let unique: BTreeSet<String> = all.into_iter().collect();
    let expected: BTreeSet<String> = items.into_iter().collect();
    assert_eq!(unique, expected);
    server.abort();
}

#[tokio::test]
async fn any_other_request_means_next() {
    let (addr, server) = serve(&["only"]).await;
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();

    write.write_all(b"NUMBER\n").await.expect("write");
    reader.read_line(&mut line).await.expect("read");
    assert_eq!(line, "1\n");

    for expected in ["only\n", "END\n", "END\n"] {
        line.clear();
        write.write_all(b"gimme\n").await.expect("write");
        reader.read_line(&mut line).await.expect("read");
        assert_eq!(line, expected);
    }
    server.abort();
}

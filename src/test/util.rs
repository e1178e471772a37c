//! In-memory doubles for the transport, pool, and selection seams, used to
//! drive the executor and cursor without a server.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    bson::{doc, Document},
    cluster::{SelectedServer, ServerSelector, TopologyType},
    cmap::{
        pool::ConnectionPool,
        Connection,
        Message,
        MessageStream,
        StreamDescription,
        StreamFactory,
    },
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
    selection_criteria::SelectionCriteria,
};

/// One step of a connection's script: a reply document, or a transport fault
/// surfaced when the driver reads the reply.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Ok(Document),
    NetworkError(std::io::ErrorKind),
}

impl Reply {
    pub(crate) fn ok(mut body: Document) -> Self {
        if !body.contains_key("ok") {
            body.insert("ok", 1);
        }
        Reply::Ok(body)
    }
}

/// The log of commands written to a scripted stream, readable by the test
/// after the fact.
pub(crate) type SentLog = Arc<Mutex<Vec<Document>>>;

pub(crate) struct ScriptedStream {
    replies: VecDeque<Reply>,
    sent: SentLog,
}

impl ScriptedStream {
    pub(crate) fn new(replies: Vec<Reply>) -> (Self, SentLog) {
        let sent: SentLog = Default::default();
        (
            Self {
                replies: replies.into(),
                sent: Arc::clone(&sent),
            },
            sent,
        )
    }
}

#[async_trait]
impl MessageStream for ScriptedStream {
    async fn write_message(&mut self, message: Message) -> Result<()> {
        let document = message.document_payload.to_document()?;
        self.sent.lock().unwrap().push(document);
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Message> {
        match self.replies.pop_front() {
            Some(Reply::Ok(body)) => {
                let raw = crate::bson::to_raw_document_buf(&body)?;
                Ok(Message::from_reply_document(raw))
            }
            Some(Reply::NetworkError(kind)) => Err(ErrorKind::from(kind).into()),
            None => Err(ErrorKind::from(std::io::ErrorKind::UnexpectedEof).into()),
        }
    }
}

/// Builds a connection whose stream replays the given replies, with its
/// handshake already applied.
pub(crate) fn scripted_connection(
    id: u32,
    description: StreamDescription,
    replies: Vec<Reply>,
) -> (Connection, SentLog) {
    let (stream, sent) = ScriptedStream::new(replies);
    let address = description.server_address.clone();
    let mut conn = Connection::new(id, address, 0, Box::new(stream));
    conn.stream_description = Some(description);
    (conn, sent)
}

/// A pool handing out pre-scripted connections.
pub(crate) struct MockPool {
    address: ServerAddress,
    connections: Mutex<VecDeque<Connection>>,
    paused: AtomicBool,
    pub(crate) checked_out: AtomicUsize,
    pub(crate) checked_in: AtomicUsize,
}

impl MockPool {
    pub(crate) fn new(address: ServerAddress) -> Arc<Self> {
        Arc::new(Self {
            address,
            connections: Mutex::new(VecDeque::new()),
            paused: AtomicBool::new(false),
            checked_out: AtomicUsize::new(0),
            checked_in: AtomicUsize::new(0),
        })
    }

    pub(crate) fn add_connection(&self, conn: Connection) {
        self.connections.lock().unwrap().push_back(conn);
    }

    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn check_out(&self) -> Result<Connection> {
        if self.paused.load(Ordering::SeqCst) {
            return Err(ErrorKind::ConnectionPoolCleared {
                message: format!("connection pool for {} is paused", self.address),
            }
            .into());
        }
        let conn = self
            .connections
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::from(ErrorKind::from(std::io::ErrorKind::ConnectionRefused)))?;
        self.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(conn)
    }

    fn check_in(&self, conn: Connection) {
        self.checked_in.fetch_add(1, Ordering::SeqCst);
        self.connections.lock().unwrap().push_back(conn);
    }

    fn address(&self) -> &ServerAddress {
        &self.address
    }
}

/// A selector that rotates over a fixed list of mock servers, like a cluster
/// whose monitoring has settled.
pub(crate) struct MockTopology {
    servers: Vec<SelectedServer>,
    next: AtomicUsize,
    pub(crate) selections: AtomicUsize,
    topology_type: TopologyType,
}

impl MockTopology {
    pub(crate) fn new(pools: Vec<Arc<MockPool>>, topology_type: TopologyType) -> Arc<Self> {
        let servers = pools
            .into_iter()
            .map(|pool| SelectedServer {
                address: pool.address().clone(),
                pool: pool as Arc<dyn ConnectionPool>,
            })
            .collect();
        Arc::new(Self {
            servers,
            next: AtomicUsize::new(0),
            selections: AtomicUsize::new(0),
            topology_type,
        })
    }
}

#[async_trait]
impl ServerSelector for MockTopology {
    async fn select_server(
        &self,
        _criteria: Option<&SelectionCriteria>,
    ) -> Result<SelectedServer> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.servers.len();
        Ok(self.servers[index].clone())
    }

    fn topology_type(&self) -> TopologyType {
        self.topology_type
    }
}

/// A stream factory whose streams reply with a vanilla hello to the greeting.
/// Used where establishment itself is not under test.
#[derive(Default)]
pub(crate) struct TestStreamFactory;

#[async_trait]
impl StreamFactory for TestStreamFactory {
    async fn connect(&self, _address: &ServerAddress) -> Result<Box<dyn MessageStream>> {
        let (stream, _) = ScriptedStream::new(vec![Reply::ok(hello_reply_body())]);
        Ok(Box::new(stream))
    }
}

pub(crate) fn hello_reply_body() -> Document {
    doc! {
        "isWritablePrimary": true,
        "setName": "rs0",
        "logicalSessionTimeoutMinutes": 30,
        "minWireVersion": 6,
        "maxWireVersion": 9,
        "maxBsonObjectSize": 16 * 1024 * 1024,
        "maxMessageSizeBytes": 48_000_000,
        "maxWriteBatchSize": 100_000,
        "connectionId": 42_i64,
    }
}

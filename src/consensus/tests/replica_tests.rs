//! Full replicas over authenticated links on a simulated network

use depchain_consensus::{BalanceReply, ConsensusConfig, Replica, ReplicaEvent, Role};
use depchain_core::{
    Block, Command, MemoryLedger, MembershipOracle, Message, ReplicaId, StaticMembership,
    Transaction, WorldState,
};
use depchain_crypto::ReplicaKeyPair;
use depchain_network::{AuthenticatedLink, LinkConfig, SimConfig, SimNetwork};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

const REPLICAS: [&str; 4] = ["leader", "member1", "member2", "member3"];
const CLIENT: &str = "client1";
const WAIT: Duration = Duration::from_secs(15);

fn id(name: &str) -> ReplicaId {
    ReplicaId::from(name)
}

struct Deployment {
    replicas: BTreeMap<ReplicaId, Replica>,
    client: BTreeMap<ReplicaId, AuthenticatedLink>,
    client_notify: Arc<Notify>,
    outbound: HashMap<ReplicaId, Vec<Arc<AtomicBool>>>,
}

fn deploy(network: &SimNetwork, genesis: &[(&str, u64)]) -> Deployment {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let names: Vec<ReplicaId> = REPLICAS.iter().chain([CLIENT].iter()).map(|n| id(n)).collect();
    let keys: HashMap<ReplicaId, Arc<ReplicaKeyPair>> = names
        .iter()
        .map(|n| (n.clone(), Arc::new(ReplicaKeyPair::generate())))
        .collect();
    let publics: HashMap<ReplicaId, [u8; 32]> =
        keys.iter().map(|(n, k)| (n.clone(), k.public_key())).collect();
    let membership: Arc<dyn MembershipOracle> = Arc::new(
        StaticMembership::with_clients(
            REPLICAS.iter().map(|n| id(n)).collect(),
            vec![id(CLIENT)],
            id("leader"),
            publics.clone(),
        )
        .unwrap(),
    );

    let link_config = LinkConfig {
        retransmit_interval: Duration::from_millis(10),
        ..LinkConfig::default()
    };
    let consensus_config = ConsensusConfig {
        epoch_timeout: Duration::from_secs(1),
        status_interval: Duration::from_millis(200),
        ..ConsensusConfig::default()
    };
    let accounts: BTreeMap<String, u64> =
        genesis.iter().map(|(a, b)| (a.to_string(), *b)).collect();

    let mut mesh = network.mesh(&names);
    let mut replicas = BTreeMap::new();
    let mut outbound: HashMap<ReplicaId, Vec<Arc<AtomicBool>>> = HashMap::new();
    let mut client = BTreeMap::new();
    let mut client_notify = Arc::new(Notify::new());

    for name in &names {
        let notify = Arc::new(Notify::new());
        let mut links = BTreeMap::new();
        for (peer, endpoint) in mesh.remove(name).unwrap() {
            outbound.entry(name.clone()).or_default().push(endpoint.block_handle());
            let link = AuthenticatedLink::connect(
                name.clone(),
                keys[name].clone(),
                peer.clone(),
                publics[&peer],
                Arc::new(endpoint),
                &link_config,
                notify.clone(),
            )
            .unwrap();
            links.insert(peer, link);
        }

        if name.as_str() == CLIENT {
            client = links;
            client_notify = notify;
            continue;
        }
        let ledger = Arc::new(MemoryLedger::new(WorldState::new(accounts.clone())));
        let replica = Replica::spawn(
            name.clone(),
            membership.clone(),
            ledger,
            links,
            notify,
            consensus_config.clone(),
        )
        .unwrap();
        replicas.insert(name.clone(), replica);
    }

    Deployment {
        replicas,
        client,
        client_notify,
        outbound,
    }
}

impl Deployment {
    fn replica(&self, name: &str) -> &Replica {
        &self.replicas[&id(name)]
    }

    fn subscribe_all(&self) -> BTreeMap<ReplicaId, broadcast::Receiver<ReplicaEvent>> {
        self.replicas
            .iter()
            .map(|(name, replica)| (name.clone(), replica.subscribe()))
            .collect()
    }

    /// Drop everything `name` sends from now on
    fn silence(&self, name: &str) {
        for handle in &self.outbound[&id(name)] {
            handle.store(true, Ordering::SeqCst);
        }
    }

    /// Let `name` reach its peers again; unacknowledged traffic is retransmitted
    fn unsilence(&self, name: &str) {
        for handle in &self.outbound[&id(name)] {
            handle.store(false, Ordering::SeqCst);
        }
    }

    /// Send a client request and wait for the first reply from `replica`
    async fn ask(&self, replica: &str, message: Message) -> Message {
        let link = &self.client[&id(replica)];
        link.send_message(&message).unwrap();
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(reply) = link.pop() {
                    return reply;
                }
                self.client_notify.notified().await;
            }
        })
        .await
        .expect("no reply")
    }
}

async fn next_event(rx: &mut broadcast::Receiver<ReplicaEvent>) -> ReplicaEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for replica event")
        .expect("event channel closed")
}

async fn expect_decided(rx: &mut broadcast::Receiver<ReplicaEvent>) -> (u64, Block) {
    match next_event(rx).await {
        ReplicaEvent::Decided { epoch, block } => (epoch, block),
        other => panic!("expected a decision, got {:?}", other),
    }
}

fn transactions_data(block: &Block) -> Vec<String> {
    block.transactions.iter().map(|tx| tx.data.clone()).collect()
}

#[tokio::test]
async fn tx1_is_decided_by_every_replica() {
    let deployment = deploy(&SimNetwork::reliable(), &[]);
    let mut events = deployment.subscribe_all();

    deployment.replica("leader").propose_value(b"TX1".to_vec()).unwrap();

    for (name, rx) in events.iter_mut() {
        let (epoch, block) = expect_decided(rx).await;
        assert_eq!(epoch, 1, "{}", name);
        assert_eq!(transactions_data(&block), vec!["TX1".to_string()]);
        assert!(block.verify_hash());
    }

    let genesis_hash = Block::genesis().hash;
    for name in REPLICAS {
        let chain = deployment.replica(name).chain();
        assert_eq!(chain.len(), 2, "{}", name);
        assert_eq!(chain[1].previous_hash, genesis_hash);
        assert_eq!(deployment.replica(name).metrics().decisions.get(), 1);
    }
    assert_eq!(deployment.replica("leader").metrics().proposals.get(), 1);
}

#[tokio::test]
async fn back_to_back_proposals_decide_in_order() {
    let deployment = deploy(&SimNetwork::reliable(), &[]);
    let mut events = deployment.subscribe_all();

    let leader = deployment.replica("leader");
    leader.propose_value(b"TX1".to_vec()).unwrap();
    leader.propose_value(b"TX2".to_vec()).unwrap();

    for (name, rx) in events.iter_mut() {
        let (first_epoch, first) = expect_decided(rx).await;
        let (second_epoch, second) = expect_decided(rx).await;
        assert_eq!((first_epoch, second_epoch), (1, 2), "{}", name);
        assert_eq!(transactions_data(&first), vec!["TX1".to_string()]);
        assert_eq!(transactions_data(&second), vec!["TX2".to_string()]);
        assert_eq!(second.previous_hash, first.hash);
    }
}

#[tokio::test]
async fn decides_over_a_lossy_network() {
    let deployment = deploy(&SimNetwork::new(SimConfig::lossy(11)), &[]);
    let mut events = deployment.subscribe_all();

    deployment.replica("leader").propose_value(b"TX1".to_vec()).unwrap();

    for (_, rx) in events.iter_mut() {
        let (_, block) = expect_decided(rx).await;
        assert_eq!(transactions_data(&block), vec!["TX1".to_string()]);
    }
}

#[tokio::test]
async fn client_transfer_updates_every_world_state() {
    let deployment = deploy(&SimNetwork::reliable(), &[("alice", 100)]);
    let mut events = deployment.subscribe_all();

    let transfer = serde_json::to_vec(&vec![Transaction::transfer("alice", "bob", 40)]).unwrap();
    deployment.client[&id("leader")]
        .send_message(&Message::new(Command::AppendBlockchain, transfer))
        .unwrap();

    for (_, rx) in events.iter_mut() {
        let (_, block) = expect_decided(rx).await;
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_transfer());
    }
    for name in REPLICAS {
        assert_eq!(deployment.replica(name).balance("alice"), Some(60), "{}", name);
        assert_eq!(deployment.replica(name).balance("bob"), Some(40), "{}", name);
    }

    // any replica answers balance queries from its own world state
    let reply = deployment.ask("member2", Message::text(Command::GetBalance, "bob")).await;
    assert_eq!(reply.command, Command::Balance);
    let balance: BalanceReply = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(balance.account, "bob");
    assert_eq!(balance.balance, Some(40));
}

#[tokio::test]
async fn balance_of_unknown_account_is_none() {
    let deployment = deploy(&SimNetwork::reliable(), &[("alice", 5)]);
    let reply = deployment.ask("member1", Message::text(Command::GetBalance, "carol")).await;
    let balance: BalanceReply = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(balance.balance, None);
}

#[tokio::test]
async fn leader_answers_blockchain_queries() {
    let deployment = deploy(&SimNetwork::reliable(), &[]);
    let mut events = deployment.subscribe_all();
    deployment.replica("leader").propose_value(b"TX1".to_vec()).unwrap();
    let rx = events.get_mut(&id("leader")).unwrap();
    expect_decided(rx).await;

    let reply = deployment.ask("leader", Message::text(Command::GetBlockchain, "")).await;
    assert_eq!(reply.command, Command::Blockchain);
    let chain: Vec<Block> = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(transactions_data(&chain[1]), vec!["TX1".to_string()]);
}

#[tokio::test]
async fn two_silent_replicas_make_the_epoch_abort() {
    let deployment = deploy(&SimNetwork::reliable(), &[]);
    let mut events = deployment.subscribe_all();
    deployment.silence("member2");
    deployment.silence("member3");

    deployment.replica("leader").propose_value(b"TX2".to_vec()).unwrap();

    // the silent pair hears both ABORTs and, with its own, has n-f of them
    for name in ["member2", "member3"] {
        let rx = events.get_mut(&id(name)).unwrap();
        assert_eq!(next_event(rx).await, ReplicaEvent::Aborted { epoch: 1 }, "{}", name);
    }

    // leader and member1 gave up but have seen only two ABORTs
    tokio::time::sleep(Duration::from_millis(300)).await;
    for name in ["leader", "member1"] {
        let rx = events.get_mut(&id(name)).unwrap();
        assert!(rx.try_recv().is_err(), "{} aborted on its own timeout", name);
    }

    deployment.unsilence("member2");
    deployment.unsilence("member3");
    for name in ["leader", "member1"] {
        let rx = events.get_mut(&id(name)).unwrap();
        assert_eq!(next_event(rx).await, ReplicaEvent::Aborted { epoch: 1 }, "{}", name);
    }

    // no block, and no second report of the same abort
    tokio::time::sleep(Duration::from_millis(300)).await;
    for (name, rx) in events.iter_mut() {
        assert!(rx.try_recv().is_err(), "{} reported twice", name);
        assert_eq!(deployment.replica(name.as_str()).chain().len(), 1);
    }
}

#[tokio::test]
async fn demoted_leader_stops_proposing() {
    let deployment = deploy(&SimNetwork::reliable(), &[]);
    let mut events = deployment.subscribe_all();
    let leader = deployment.replica("leader");

    leader.change_role(Role::Member).unwrap();
    leader.propose_value(b"ignored".to_vec()).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let rx = events.get_mut(&id("leader")).unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(leader.metrics().proposals.get(), 0);

    leader.change_role(Role::Leader).unwrap();
    leader.propose_value(b"TX1".to_vec()).unwrap();
    let (epoch, block) = expect_decided(rx).await;
    assert_eq!(epoch, 1);
    assert_eq!(transactions_data(&block), vec!["TX1".to_string()]);
}

use mcts::config::SearchConfig;
use mcts::mcts::{
    BestMoveInfo, NodeGarbageCollector, NodeTree, Search, SearchLimits, SearchParams,
};
use mcts::neural::{RandomNetwork, UniformNetwork};
use mcts::soko::SokoBoard;
use mcts::Action;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Finished = (Search<SokoBoard>, mpsc::Receiver<BestMoveInfo>, NodeTree<SokoBoard>);

fn run(board: SokoBoard, movetime: Duration, threads: usize) -> Finished {
    let tree = NodeTree::new(board, Arc::new(NodeGarbageCollector::new()));
    let (tx, rx) = mpsc::channel();
    let params = SearchParams::new(&SearchConfig::default().with_minibatch_size(16)).unwrap();
    let search = Search::new(
        &tree,
        Arc::new(RandomNetwork),
        tx,
        SearchLimits::movetime(movetime),
        params,
    );
    search.run_blocking(threads).unwrap();
    (search, rx, tree)
}

#[test]
fn test_startpos_has_only_one_move() {
    let (search, rx, _tree) = run(SokoBoard::startpos(), Duration::from_millis(200), 2);
    let info = rx.try_recv().unwrap();
    assert_eq!(info.best_move, Some(Action::Up));
    assert!(rx.try_recv().is_err());

    let stats = search.root_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].action, Action::Up);
    assert!((stats[0].prior - 1.0).abs() < 1e-6);
    assert_eq!(stats[0].n_in_flight, 0);
    assert!(stats[0].n >= 1);
    assert_eq!(search.root_visits(), stats[0].n + 1);
}

#[test]
fn test_deadline_is_respected() {
    let start = Instant::now();
    let (_search, rx, _tree) = run(SokoBoard::startpos(), Duration::from_millis(100), 4);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(rx.try_recv().is_ok());
}

#[test]
fn test_winning_push_propagates_to_root() {
    let board = SokoBoard::from_fen("#####\n#@$.#\n#####\n").unwrap();
    let (search, rx, _tree) = run(board, Duration::from_millis(100), 2);
    let info = rx.try_recv().unwrap();
    assert_eq!(info.best_move, Some(Action::Right));

    let stats = search.root_stats();
    assert_eq!(stats.len(), 1);
    assert!((stats[0].q - 1.0).abs() < 1e-6);
    assert!((search.best_eval() - 1.0).abs() < 1e-6);
}

#[test]
fn test_uniform_network_prefers_the_solving_push() {
    let board = SokoBoard::from_fen("######\n#    #\n# @$.#\n#    #\n######\n").unwrap();
    let tree = NodeTree::new(board, Arc::new(NodeGarbageCollector::new()));
    let (tx, rx) = mpsc::channel();
    let search = Search::new(
        &tree,
        Arc::new(UniformNetwork::default()),
        tx,
        SearchLimits::movetime(Duration::from_millis(300)),
        SearchParams::new(&SearchConfig::default().with_minibatch_size(8)).unwrap(),
    );
    search.run_blocking(2).unwrap();
    assert_eq!(rx.try_recv().unwrap().best_move, Some(Action::Right));
}

use mcts::mcts::{
    BestMoveInfo, NodeGarbageCollector, NodeTree, Search, SearchLimits, SearchParams,
};
use mcts::neural::RandomNetwork;
use mcts::soko::SokoBoard;
use mcts::Action;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn infinite_search(tree: &NodeTree<SokoBoard>) -> (Search<SokoBoard>, mpsc::Receiver<BestMoveInfo>) {
    let (tx, rx) = mpsc::channel();
    let search = Search::new(
        tree,
        Arc::new(RandomNetwork),
        tx,
        SearchLimits::infinite(),
        SearchParams::default(),
    );
    (search, rx)
}

#[test]
fn test_repeated_abort_sends_one_move() {
    let tree = NodeTree::new(SokoBoard::startpos(), Arc::new(NodeGarbageCollector::new()));
    let (search, rx) = infinite_search(&tree);
    search.start_threads(2).unwrap();
    thread::sleep(Duration::from_millis(50));

    search.abort();
    search.abort();
    search.wait().unwrap();
    search.abort();
    assert!(!search.is_search_active());

    let messages: Vec<_> = rx.try_iter().collect();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].best_move, Some(Action::Up));
}

#[test]
fn test_abort_racing_stop_sends_one_move() {
    for _ in 0..10 {
        let tree = NodeTree::new(SokoBoard::startpos(), Arc::new(NodeGarbageCollector::new()));
        let (search, rx) = infinite_search(&tree);
        let search = Arc::new(search);
        search.start_threads(2).unwrap();

        let stopper = {
            let search = Arc::clone(&search);
            thread::spawn(move || search.stop())
        };
        let aborter = {
            let search = Arc::clone(&search);
            thread::spawn(move || search.abort())
        };
        stopper.join().unwrap();
        aborter.join().unwrap();
        search.wait().unwrap();

        assert_eq!(rx.try_iter().count(), 1);
    }
}

#[test]
fn test_abort_racing_deadline_sends_one_move() {
    for round in 0..20u64 {
        let tree = NodeTree::new(SokoBoard::startpos(), Arc::new(NodeGarbageCollector::new()));
        let (tx, rx) = mpsc::channel();
        let search = Search::new(
            &tree,
            Arc::new(RandomNetwork),
            tx,
            SearchLimits::movetime(Duration::from_millis(3)),
            SearchParams::default(),
        );
        search.start_threads(2).unwrap();
        // Land the abort just before, at and just after the deadline.
        thread::sleep(Duration::from_micros(2000 + 100 * round));
        search.abort();
        search.wait().unwrap();

        assert_eq!(rx.try_iter().count(), 1);
        assert!(!search.is_search_active());
    }
}

#[test]
fn test_best_move_is_frozen_after_delivery() {
    let tree = NodeTree::new(SokoBoard::startpos(), Arc::new(NodeGarbageCollector::new()));
    let (search, rx) = infinite_search(&tree);
    search.start_threads(1).unwrap();
    thread::sleep(Duration::from_millis(30));
    search.abort();
    search.wait().unwrap();

    let sent = rx.try_recv().unwrap();
    assert_eq!(search.best_move(), sent.best_move);
}

#[test]
fn test_drop_delivers_the_move() {
    let tree = NodeTree::new(SokoBoard::startpos(), Arc::new(NodeGarbageCollector::new()));
    let (search, rx) = infinite_search(&tree);
    search.start_threads(2).unwrap();
    drop(search);
    assert_eq!(rx.try_iter().count(), 1);
}

//! End-to-end interpreter sessions: read, evaluate, print.

use mueval_core::{ErrorKind, Interp};

fn run(src: &str) -> Vec<String> {
    let mut interp = Interp::new().unwrap();
    interp.eval_script(src).unwrap()
}

fn run_last(src: &str) -> String {
    run(src).pop().unwrap()
}

#[test]
fn addition() {
    assert_eq!(run_last("(+ 1 2 3 4) "), "10");
}

#[test]
fn factorial() {
    assert_eq!(
        run("(define (fact n) (if (< n 2) 1 (* n (fact (- n 1))))) (fact 6) "),
        ["()", "720"]
    );
}

#[test]
fn let_binds_in_parallel() {
    assert_eq!(run_last("(let ((x 10) (y 20)) (+ x y)) "), "30");
    assert_eq!(run_last("(let () 42) "), "42");
    assert_eq!(
        run_last("(define x 1) (let ((x 10) (y x)) (+ x y)) "),
        "11"
    );
}

#[test]
fn rest_parameter_collects_all_arguments() {
    assert_eq!(run_last("((lambda x x) 1 2 3) "), "(1 2 3)");
    assert_eq!(run_last("((lambda (a . b) b) 1 2 3) "), "(2 3)");
    assert_eq!(run_last("((lambda (a . b) a) 1 2 3) "), "1");
}

#[test]
fn cond_picks_the_first_true_clause() {
    assert_eq!(
        run_last("(cond ((= 1 2) 'a) ((= 2 2) 'b) (else 'c)) "),
        "b"
    );
    assert_eq!(run_last("(cond ((= 1 2) 'a) (else 'c)) "), "c");
    assert_eq!(run_last("(cond (#t 1 2 3)) "), "3");
}

#[test]
fn cyclic_pair_stays_a_pair_and_prints_bounded() {
    let mut interp = Interp::new().unwrap();
    let results = interp
        .eval_script("(define p (cons 1 2)) (set-cdr! p p) (pair? p) ")
        .unwrap();
    assert_eq!(results[2], "#T");
    // write must terminate by virtue of the node quota
    let bang = interp.eval_script("!! ").unwrap();
    assert_eq!(bang, ["#T"]);
    let rendered = interp.eval_script("(eq? p (cdr p)) ").unwrap();
    assert_eq!(rendered, ["#T"]);
}

#[test]
fn deep_recursion_runs_in_constant_host_stack() {
    // tail calls through the label machine; neither interpreter stack grows
    assert_eq!(
        run("(define (loop n) (if (= n 0) 'done (loop (- n 1)))) (loop 100000) "),
        ["()", "done"]
    );
}

#[test]
fn evaluation_is_left_to_right() {
    let src = "
        (define order '())
        (define (note x) (set! order (cons x order)) x)
        (define (f a b) (list a b))
        (f (note 'g) (note 'h))
        order ";
    let results = run(src);
    assert_eq!(results[3], "(g h)");
    assert_eq!(results[4], "(h g)");
}

#[test]
fn and_or_short_circuit() {
    assert_eq!(run_last("(and #f (error \"x\")) "), "#F");
    assert_eq!(run_last("(or #t (error \"x\")) "), "#T");
    assert_eq!(run_last("(and) "), "#T");
    assert_eq!(run_last("(or) "), "#F");
    assert_eq!(run_last("(and 1 2 3) "), "3");
    assert_eq!(run_last("(or #f 2 (error \"x\")) "), "2");
    assert_eq!(run_last("(and #f #f) "), "#F");
    assert_eq!(run_last("(or #f #f) "), "#F");
}

#[test]
fn reserved_symbols_are_self_identical() {
    for s in ["car", "garbagecollect", "else", "set-car!", "+", "<="] {
        assert_eq!(run_last(&format!("(eq? (quote {s}) (quote {s})) ")), "#T");
    }
}

#[test]
fn define_is_visible_later_in_a_body() {
    assert_eq!(
        run_last("(define (f) (define a 1) (define b 2) (+ a b)) (f) "),
        "3"
    );
}

#[test]
fn closures_share_their_captured_environment() {
    let src = "
        (define (make-counter)
          (let ((n 0))
            (lambda () (set! n (+ n 1)) n)))
        (define c (make-counter))
        (c) (c) (c) ";
    let results = run(src);
    assert_eq!(&results[2..], ["1", "2", "3"]);
}

#[test]
fn collection_preserves_live_data_across_definitions() {
    let src = "
        (define keep '(1 2 3 4 5))
        (define (churn n) (if (= n 0) 'ok (churn (- n 1))))
        (churn 20000)
        (garbagecollect)
        keep ";
    assert_eq!(run(src).pop().unwrap(), "(1 2 3 4 5)");
}

#[test]
fn quoted_structures_survive_collection_by_identity() {
    let src = "
        (define a '(x y z))
        (define b a)
        (garbagecollect)
        (eq? a b) ";
    assert_eq!(run(src).pop().unwrap(), "#T");
}

#[test]
fn errors_leave_the_interpreter_recoverable() {
    let mut interp = Interp::new().unwrap();
    assert_eq!(
        interp.eval_script("undefined-name ").unwrap_err().kind,
        ErrorKind::Unbound
    );
    interp.reset();
    assert_eq!(interp.eval_script("(* 6 7) ").unwrap(), ["42"]);

    // recovery after a mid-evaluation error inside nested applications
    assert!(interp.eval_script("(+ 1 (car 2)) ").is_err());
    interp.reset();
    assert_eq!(interp.eval_script("(+ 1 2) ").unwrap(), ["3"]);
}

#[test]
fn bang_tracks_the_latest_result() {
    assert_eq!(run("(* 3 4) (+ !! 1) !! "), ["12", "13", "13"]);
}

#[test]
fn deep_nesting_round_trips_through_the_machine() {
    // build (((...1...))) with 200 levels of parentheses around a lambda app
    let mut src = String::from("1");
    for _ in 0..200 {
        src = format!("((lambda (x) x) {src})");
    }
    src.push(' ');
    assert_eq!(run_last(&src), "1");
}

#[test]
fn writer_output_reads_back_for_the_data_subset() {
    let mut interp = Interp::new().unwrap();
    interp.set_write_quota(100_000);
    let forms = [
        "()",
        "#T",
        "#F",
        "42",
        "-42",
        "100000",
        "#\\a",
        "#\\space",
        "#\\newline",
        "\"hello world\"",
        "\"quote \\\" and slash \\\\\"",
        "abc",
        "a-longer-symbol",
        "(1 2 3)",
        "(1 . 2)",
        "(1 (2 (3 (4))) . 5)",
    ];
    for form in forms {
        let first = interp.eval_script(&format!("'{form} ")).unwrap().remove(0);
        let second = interp.eval_script(&format!("'{first} ")).unwrap().remove(0);
        assert_eq!(first, second, "round-trip of {form}");
    }
}

#[test]
fn deep_list_round_trips() {
    let mut interp = Interp::new().unwrap();
    interp.set_write_quota(100_000);
    let items: String = (0..1000).map(|i| format!("{i} ")).collect();
    let first = interp
        .eval_script(&format!("'({items}) "))
        .unwrap()
        .remove(0);
    let second = interp.eval_script(&format!("'{first} ")).unwrap().remove(0);
    assert_eq!(first, second);
}

#[test]
fn gcstat_reports_free_resources() {
    let mut interp = Interp::new().unwrap();
    let out = interp
        .eval_script("(define s (gcstat)) (length s) (car s) ")
        .unwrap();
    assert_eq!(out[1], "4");
    let free: i64 = out[2].parse().unwrap();
    assert!(free > 0 && free < 8192);
}

#[test]
fn syntax_checking_can_be_toggled_off() {
    let mut interp = Interp::new().unwrap();
    // with checking off, the ill-formed quote no longer raises
    let out = interp
        .eval_script("(synchecktoggle) (quote) ")
        .unwrap();
    assert_eq!(out[0], "#T");
    assert_eq!(out[1], "()");
}

use crate::interp::opcodes::*;
use crate::interp::OpResult;
use crate::thread::JavaThread;
use crate::Thrown;

/// The stack-shuffle family. All of these operate on raw cells with their
/// tags, so category-2 values (two tagged cells) and type identities move
/// together, which is what keeps the collector's reference scan exact.
pub fn shuffle(thread: &mut JavaThread, op: u8) -> Result<OpResult, Thrown> {
    let frame = thread.top();

    match op {
        POP => {
            frame.pop();
        }
        POP2 => {
            frame.pop();
            frame.pop();
        }
        DUP => {
            let (cell, tag) = frame.peek(0);
            frame.push(cell, tag);
        }
        DUP_X1 => {
            let (a, at) = frame.pop();
            let (b, bt) = frame.pop();
            frame.push(a, at);
            frame.push(b, bt);
            frame.push(a, at);
        }
        DUP_X2 => {
            let (a, at) = frame.pop();
            let (b, bt) = frame.pop();
            let (c, ct) = frame.pop();
            frame.push(a, at);
            frame.push(c, ct);
            frame.push(b, bt);
            frame.push(a, at);
        }
        DUP2 => {
            let (a, at) = frame.peek(0);
            let (b, bt) = frame.peek(1);
            frame.push(b, bt);
            frame.push(a, at);
        }
        DUP2_X1 => {
            let (a, at) = frame.pop();
            let (b, bt) = frame.pop();
            let (c, ct) = frame.pop();
            frame.push(b, bt);
            frame.push(a, at);
            frame.push(c, ct);
            frame.push(b, bt);
            frame.push(a, at);
        }
        DUP2_X2 => {
            let (a, at) = frame.pop();
            let (b, bt) = frame.pop();
            let (c, ct) = frame.pop();
            let (d, dt) = frame.pop();
            frame.push(b, bt);
            frame.push(a, at);
            frame.push(d, dt);
            frame.push(c, ct);
            frame.push(b, bt);
            frame.push(a, at);
        }
        SWAP => {
            let (a, at) = frame.pop();
            let (b, bt) = frame.pop();
            frame.push(a, at);
            frame.push(b, bt);
        }
        x => panic!("not a stack opcode: 0x{:02x}", x),
    }

    Ok(OpResult::Advance(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassId;
    use crate::mem::{Cell, ValueType};
    use crate::thread::Frame;

    fn thread_with_frame() -> JavaThread {
        let mut thread = JavaThread::new(1, 1 << 16);
        assert!(thread.push_frame(Frame::new(ClassId(0), 0, 0, 8)));
        thread
    }

    fn drain(thread: &mut JavaThread) -> Vec<u32> {
        let frame = thread.top();
        let mut values = Vec::new();
        while frame.depth() > 0 {
            values.push(frame.pop().0 .0);
        }
        values
    }

    #[test]
    fn dup_then_pop_is_identity() {
        let mut thread = thread_with_frame();
        thread.top().push(Cell(7), ValueType::Int);
        shuffle(&mut thread, DUP).unwrap();
        shuffle(&mut thread, POP).unwrap();
        assert_eq!(drain(&mut thread), vec![7]);
    }

    #[test]
    fn swap_is_its_own_inverse() {
        let mut thread = thread_with_frame();
        thread.top().push(Cell(1), ValueType::Int);
        thread.top().push(Cell(2), ValueType::Reference);

        shuffle(&mut thread, SWAP).unwrap();
        assert_eq!(thread.top().peek(0).1, ValueType::Int);
        shuffle(&mut thread, SWAP).unwrap();
        assert_eq!(thread.top().peek(0).1, ValueType::Reference);
        assert_eq!(drain(&mut thread), vec![2, 1]);
    }

    #[test]
    fn dup_x1_inserts_below() {
        let mut thread = thread_with_frame();
        thread.top().push(Cell(1), ValueType::Int);
        thread.top().push(Cell(2), ValueType::Int);
        shuffle(&mut thread, DUP_X1).unwrap();
        assert_eq!(drain(&mut thread), vec![2, 1, 2]);
    }

    #[test]
    fn dup2_duplicates_a_long_pair() {
        let mut thread = thread_with_frame();
        thread.top().push_long(0x0102_0304_0506_0708);
        shuffle(&mut thread, DUP2).unwrap();
        assert_eq!(thread.top().pop_long(), 0x0102_0304_0506_0708);
        assert_eq!(thread.top().pop_long(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn dup2_x2_moves_two_pairs() {
        let mut thread = thread_with_frame();
        thread.top().push_long(1);
        thread.top().push_long(2);
        shuffle(&mut thread, DUP2_X2).unwrap();
        assert_eq!(thread.top().pop_long(), 2);
        assert_eq!(thread.top().pop_long(), 1);
        assert_eq!(thread.top().pop_long(), 2);
        assert_eq!(thread.top().depth(), 0);
    }
}

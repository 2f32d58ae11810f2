/// Selects over multiple channel clauses, running exactly one branch.
///
/// select! supports three different clauses for receive, send and default
/// respectively.
///
/// * `pattern = <-receiver[, if condition] => code,`
/// * `pattern = sender<-expression[, if condition] => code,`
/// * `default => code,`
///
/// `receiver` must be a `mut` binding implementing
/// [PermitReader](crate::select::PermitReader) and `sender` one implementing
/// [PermitWriter](crate::select::PermitWriter); channels hand these out
/// through `on_recv`/`on_recv_catching` and `on_send`.
///
/// ## Restrictions
/// * `sender` and `receiver` must be `mut` idents but not expressions.
/// * `pattern` must be irrefutable.
///
/// ## Evaluation
/// * All conditions are evaluated before selection.
/// * Send expression is only evaluated if that branch is selected.
/// * `default` case is run if no other case is ready.
///
/// ## Panics
/// * Panic when all send and receive branches are disabled and there is no
///   default case.
///
/// ## Examples
/// ```rust
/// use chute::channel::ArrayChannel;
/// use chute::select;
///
/// let numbers = ArrayChannel::<i32>::new(1);
/// let words = ArrayChannel::new(1);
/// words.send("ready").unwrap();
///
/// let mut recv_number = numbers.on_recv();
/// let mut recv_word = words.on_recv();
/// select! {
///     _ = <-recv_number => unreachable!("nothing sent"),
///     word = <-recv_word => assert_eq!(word, Some("ready")),
/// }
/// ```

// @list list cases and normalize branch body to form `{ $body; }` with
//       trailing comma.
// @case pattern match cases and verify them.
// @init generate initialization code.
// @add prepare selectables and select for permit.
// @complete match selection to select branch for execution.
#[macro_export]
macro_rules! select {
    (@list
        ()
        $cases:tt
    ) => {
        $crate::select!(
            @case
            $cases
            ()
            ()
        )
    };

    // List default case.

    // Last clause.
    (@list
        (default => $body:expr)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ()
            ($($cases)* default => { $body; },)
        )
    };
    // No last clause.
    (@list
        (default => $body:expr, $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ($($tokens)*)
            ($($cases)* default => { $body; },)
        )
    };

    // List operation case. `block` is a special kind of `expr`, match it first.

    // recv: Block with trailing comma.
    (@list
        ($bind:pat = <- $r:ident $(, if $pred:expr)? => $body:block, $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ($($tokens)*)
            ($($cases)* recv($r) -> $bind, [$($pred)*] => { $body; },)
        )
    };
    // recv: Block without trailing comma.
    (@list
        ($bind:pat = <- $r:ident $(, if $pred:expr)? => $body:block $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ($($tokens)*)
            ($($cases)* recv($r) -> $bind, [$($pred)*] => { $body; },)
        )
    };
    // recv: Comma is optional in last case.
    (@list
        ($bind:pat = <- $r:ident $(, if $pred:expr)? => $body:expr)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ()
            ($($cases)* recv($r) -> $bind, [$($pred)*] => { $body; },)
        )
    };
    // recv: Comma is mandatory in no last case.
    (@list
        ($bind:pat = <- $r:ident $(, if $pred:expr)? => $body:expr, $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ($($tokens)*)
            ($($cases)* recv($r) -> $bind, [$($pred)*] => { $body; },)
        )
    };
    // recv: Complain missing comma.
    (@list
        ($bind:pat = <- $r:ident $(, if $pred:expr)? => $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        compile_error!("expect `,` after expression in not last branch")
    };

    // send: Block with trailing comma.
    (@list
        ($bind:pat = $sender:ident <- $value:expr $(, if $pred:expr)? => $body:block, $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ($($tokens)*)
            ($($cases)* send($sender, $value) -> $bind, [$($pred)*] => { $body; },)
        )
    };
    // send: Block without trailing comma.
    (@list
        ($bind:pat = $sender:ident <- $value:expr $(, if $pred:expr)? => $body:block $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ($($tokens)*)
            ($($cases)* send($sender, $value) -> $bind, [$($pred)*] => { $body; },)
        )
    };
    // send: Comma is optional in last case.
    (@list
        ($bind:pat = $sender:ident <- $value:expr $(, if $pred:expr)? => $body:expr)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ()
            ($($cases)* send($sender, $value) -> $bind, [$($pred)*] => { $body; },)
        )
    };
    // send: Comma is mandatory in no last case.
    (@list
        ($bind:pat = $sender:ident <- $value:expr $(, if $pred:expr)? => $body:expr, $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        $crate::select!(
            @list
            ($($tokens)*)
            ($($cases)* send($sender, $value) -> $bind, [$($pred)*] => { $body; },)
        )
    };
    // send: Complain missing comma.
    (@list
        ($bind:pat = $sender:ident <- $value:expr $(, if $pred:expr)? => $($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        compile_error!("expect `,` after expression in not last branch")
    };

    (@list
        ($($tokens:tt)*)
        ($($cases:tt)*)
    ) => {
        compile_error!("fail to list select cases")
    };

    // All cases are verified, let's generate code.
    (@case
        ()
        $cases:tt
        $default:tt
    ) => {
        $crate::select!(@init $cases $default)
    };

    // `default` case.
    (@case
        (default => $body:tt, $($pendings:tt)*)
        ($($cases:tt)*)
        ()
    ) => {
        $crate::select!(
            @case
            ($($pendings)*)
            ($($cases)*)
            (default => $body,)
        )
    };
    // At most one default case.
    (@case
        (default $($unused:tt)*)
        ($($cases:tt)*)
        ($($def:tt)+)
    ) => {
        compile_error!("more than one `default` case in `select` block")
    };

    // Recv case.
    (@case
        (recv($r:ident) -> $bind:pat, $pred:tt => $body:tt, $($pendings:tt)*)
        ($($cases:tt)*)
        $default:tt
    ) => {
        $crate::select!(
            @case
            ($($pendings)*)
            ($($cases)* recv($r) -> $bind, $pred => $body,)
            $default
        )
    };

    // Send case.
    (@case
        (send($s:ident, $v:expr) -> $bind:pat, $pred:tt => $body:tt, $($pendings:tt)*)
        ($($cases:tt)*)
        $default:tt
    ) => {
        $crate::select!(
            @case
            ($($pendings)*)
            ($($cases)* send($s, $v) -> $bind, $pred => $body,)
            $default
        )
    };

    // Init select.
    (@init
        $cases:tt
        $default:tt
    ) => {{
        use $crate::select::Select;
        const _LEN: usize = $crate::select!(@count $cases);
        let mut _selector: [Option<&'_ dyn $crate::select::Selectable>; _LEN] = [::std::option::Option::None; _LEN];
        $crate::select!(
            @add
            _selector
            $cases
            $default
            (
                (0x00usize)
                (0x01usize)
                (0x02usize)
                (0x03usize)
                (0x04usize)
                (0x05usize)
                (0x06usize)
                (0x07usize)
                (0x08usize)
                (0x09usize)
                (0x0ausize)
                (0x0busize)
                (0x0cusize)
                (0x0dusize)
                (0x0eusize)
                (0x0fusize)
                (0x10usize)
                (0x11usize)
                (0x12usize)
                (0x13usize)
                (0x14usize)
                (0x15usize)
                (0x16usize)
                (0x17usize)
                (0x18usize)
                (0x19usize)
                (0x1ausize)
                (0x1busize)
                (0x1cusize)
                (0x1dusize)
                (0x1eusize)
                (0x1fusize)
            )
            ()
        )
    }};

    // Let's select!
    (@add
        $selector:ident
        ()
        ()
        $labels:tt
        $cases:tt
    ) => {{
        let _selection = unsafe { $selector.select() };
        $crate::select!(
            @complete
            $selector
            _selection
            $cases
        )
    }};

    // Try select!
    (@add
        $selector:ident
        ()
        (default => $body:tt,)
        $labels:tt
        $cases:tt
    ) => {{
        let _selection = unsafe { $selector.try_select() };
        match _selection {
            ::std::option::Option::None => {
                { $selector };
                $body
            },
            ::std::option::Option::Some(_selection) => {
                $crate::select!(
                    @complete
                    $selector
                    _selection
                    $cases
                )
            }
        }
    }};

    // No remaining labels.
    (@add
        $selector:ident
        $candidates:tt
        $default:tt
        ()
        $cases:tt
    ) => {
        compile_error!("too many select! cases")
    };

    // Select receiver.
    (@add
        $selector:ident
        (recv($r:ident) -> $bind:pat, [$($pred:expr)?] => $body:tt, $($pendings:tt)*)
        $default:tt
        (($index:tt) $($labels:tt)*)
        ($($cases:tt)*)
    ) => {{
        let mut _enabled = true;
        $( _enabled = $pred; ) ?
        if _enabled {
            let ref _ref = $r;
            let _ref = unsafe { ::std::mem::transmute::<&dyn $crate::select::Selectable, &'_ dyn $crate::select::Selectable>(_ref) };
            $selector[$index] = Some(_ref);
        }
        $crate::select!(
            @add
            $selector
            ($($pendings)*)
            $default
            ($($labels)*)
            ($($cases)* [$index] recv($r) -> $bind => $body,)
        )
    }};

    // Select sender.
    (@add
        $selector:ident
        (send($s:ident, $v:expr) -> $bind:pat, [$($pred:expr)?] => $body:tt, $($pendings:tt)*)
        $default:tt
        (($index:tt) $($labels:tt)*)
        ($($cases:tt)*)
    ) => {{
        let mut _enabled = true;
        $( _enabled = $pred; ) ?
        if _enabled {
            let ref _ref = $s;
            let _ref = unsafe { ::std::mem::transmute::<&dyn $crate::select::Selectable, &'_ dyn $crate::select::Selectable>(_ref) };
            $selector[$index] = Some(_ref);
        }
        $crate::select!(
            @add
            $selector
            ($($pendings)*)
            $default
            ($($labels)*)
            ($($cases)* [$index] send($s, $v) -> $bind => $body,)
        )
    }};

    // Panic if no matching selectable.
    (@complete
        $selector:ident
        $selection:ident
        ()
    ) => {{
        unreachable!("no matching selectable")
    }};

    // Match a receive operation.
    (@complete
        $selector:ident
        $selection:ident
        ([$index:tt] recv($r:ident) -> $bind:pat => $body:tt, $($cases:tt)*)
    ) => {{
        if $selection.0 == $index {
            { $selector };
            let $bind = $crate::select::PermitReader::consume_permit(&mut $r, $selection.1);
            $body
        } else {
            $crate::select!(
                @complete
                $selector
                $selection
                ($($cases)*)
            )
        }
    }};

    // Match a send operation.
    (@complete
        $selector:ident
        $selection:ident
        ([$index:tt] send($s:ident, $v:expr) -> $bind:pat => $body:tt, $($cases:tt)*)
    ) => {{
        if $selection.0 == $index {
            { $selector };
            let $bind = $crate::select::PermitWriter::consume_permit(&mut $s, $selection.1, $v);
            $body
        } else {
            $crate::select!(
                @complete
                $selector
                $selection
                ($($cases)*)
            )
        }
    }};

    // Count select cases.
    (@count ()) => { 0 };
    (@count ($ident:ident $args:tt -> $bind:pat, $pred:tt => $body:tt, $($cases:tt)*)) => {
        1 + $crate::select!(@count ($($cases)*))
    };

    // Entry points.
    () => {
        compile_error!("empty `select!` block")
    };
    ($($tokens:tt)*) => {
        $crate::select!(@list ($($tokens)*) ())
    }
}

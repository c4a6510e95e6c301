/// Doc string linking to the Bitcoin Core source a definition follows.
///
/// Without a commit, links to the Core revision the type rules and
/// satisfaction algebra were checked against.
#[macro_export]
#[doc(hidden)]
macro_rules! bitcoin_definition_link {
    (
        $file_path:literal, // File path within `bitcoin`'s `src/`, e.g. `script/miniscript.h`
        $start:literal$(..=$end:literal)? // File lines, e.g. `0..=123` or `0`
    ) => {
        $crate::bitcoin_definition_link!(
            "8333aa5302902f6be929c30b3c2b4e91c6583224",
            $file_path,
            $start$(..=$end)?
        )
    };
    (
        $commit:literal, // Git commit hash
        $file_path:literal,
        $start:literal$(..=$end:literal)?
    ) => {
        concat!(
            "Bitcoin Core [implementation](https://github.com/bitcoin/bitcoin/blob/",
            $commit,
            "/src/",
            $file_path,
            "#L",
            stringify!($start),
            $(
                "-L",
                stringify!($end),
            )?
            ")."
        )
    };
}

//! Grammar switches controlling which lexeme families the tokenizer accepts.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Independently togglable grammar rules.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Rules: u64 {
        /// `+ - * /` and unary minus.
        const MATH = 1 << 0;
        /// `< <= > >=`
        const COMPARE = 1 << 1;
        /// `= <>`
        const COMPARE_EQ = 1 << 2;
        /// `and or not`
        const LOGIC = 1 << 3;
        /// Parenthesized groups.
        const GROUP = 1 << 4;
        /// Double quoted string literals.
        const VAR_STR = 1 << 5;
        /// Numeric literals with optional suffix.
        const VAR_NUM = 1 << 6;
        /// `{HOST.HOST}` style macros, including nested function macros.
        const MACRO = 1 << 7;
        /// `{$USER}` macros.
        const USERMACRO = 1 << 8;
        /// `{#LLD}` macros.
        const LLDMACRO = 1 << 9;
        /// `name(...)` function calls.
        const FUNCTION = 1 << 10;
        /// `{123}` function references.
        const FUNCTIONID = 1 << 11;
        /// `/host/key?[filter]` item queries.
        const QUERY = 1 << 12;
        /// Numbers assembled from macro and digit fragments.
        const COMPOUND_CONST = 1 << 13;
        /// Give constants a sequential index in `Token::opt`.
        const CONST_INDEX = 1 << 14;
        /// `tag` property.
        const PROP_TAG = 1 << 15;
        /// `group` property.
        const PROP_GROUP = 1 << 16;

        const BASIC_MATH = Self::MATH.bits() | Self::COMPARE.bits() | Self::COMPARE_EQ.bits()
            | Self::LOGIC.bits() | Self::GROUP.bits() | Self::VAR_NUM.bits();

        const TRIGGER_EXPRESSION = Self::BASIC_MATH.bits() | Self::VAR_STR.bits()
            | Self::MACRO.bits() | Self::USERMACRO.bits() | Self::FUNCTION.bits()
            | Self::FUNCTIONID.bits() | Self::COMPOUND_CONST.bits();

        const CALC_EXPRESSION = Self::BASIC_MATH.bits() | Self::VAR_STR.bits()
            | Self::USERMACRO.bits() | Self::FUNCTION.bits() | Self::QUERY.bits();

        const QUERY_EXPRESSION = Self::PROP_TAG.bits() | Self::PROP_GROUP.bits()
            | Self::VAR_STR.bits() | Self::USERMACRO.bits() | Self::COMPARE_EQ.bits()
            | Self::LOGIC.bits() | Self::GROUP.bits();

        const LLD_FILTER_EXPRESSION = Self::MACRO.bits() | Self::LOGIC.bits() | Self::GROUP.bits();

        /// Correlation conditions share the LLD filter grammar.
        const CORRELATION_EXPRESSION = Self::LLD_FILTER_EXPRESSION.bits();

        const EXPRESSION_MACRO = Self::BASIC_MATH.bits() | Self::VAR_STR.bits()
            | Self::MACRO.bits() | Self::USERMACRO.bits() | Self::FUNCTION.bits()
            | Self::QUERY.bits();
    }
}

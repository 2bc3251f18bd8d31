//! Port and stream aliases for each BulkIO data type
//!
//! Ports are generic over their payload; these names match the interface
//! each one speaks (`dataFloat`, `dataShort`, ...).

use crate::data::{BitBuffer, FileUri, XmlDocument};
use crate::input::{InPort, InputStream};
use crate::output::{OutPort, OutputStream};

macro_rules! port_aliases {
    ($($payload:ty => $in_port:ident, $out_port:ident, $in_stream:ident, $out_stream:ident;)*) => {
        $(
            pub type $in_port = InPort<$payload>;
            pub type $out_port = OutPort<$payload>;
            pub type $in_stream = InputStream<$payload>;
            pub type $out_stream = OutputStream<$payload>;
        )*
    };
}

port_aliases! {
    Vec<i8> => InCharPort, OutCharPort, InCharStream, OutCharStream;
    Vec<u8> => InOctetPort, OutOctetPort, InOctetStream, OutOctetStream;
    Vec<i16> => InShortPort, OutShortPort, InShortStream, OutShortStream;
    Vec<u16> => InUShortPort, OutUShortPort, InUShortStream, OutUShortStream;
    Vec<i32> => InLongPort, OutLongPort, InLongStream, OutLongStream;
    Vec<u32> => InULongPort, OutULongPort, InULongStream, OutULongStream;
    Vec<i64> => InLongLongPort, OutLongLongPort, InLongLongStream, OutLongLongStream;
    Vec<u64> => InULongLongPort, OutULongLongPort, InULongLongStream, OutULongLongStream;
    Vec<f32> => InFloatPort, OutFloatPort, InFloatStream, OutFloatStream;
    Vec<f64> => InDoublePort, OutDoublePort, InDoubleStream, OutDoubleStream;
    BitBuffer => InBitPort, OutBitPort, InBitStream, OutBitStream;
    FileUri => InFilePort, OutFilePort, InFileStream, OutFileStream;
    XmlDocument => InXmlPort, OutXmlPort, InXmlStream, OutXmlStream;
}

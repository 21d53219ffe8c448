mod documents;
pub use documents::{GetDocumentCommand, PutDocumentCommand, PutResult};

mod tcp_info;
pub use tcp_info::{GetTcpInfoCommand, TcpConnectionInfo};

mod topology;
pub use topology::{
    ClusterTopology, ClusterTopologyResponse, GetClusterTopologyCommand,
    GetDatabaseTopologyCommand,
};

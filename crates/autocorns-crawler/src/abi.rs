//! Contract interfaces used by the crawlers
//!
//! Only the functions the crawlers call are declared.

use alloy_sol_types::sol;

sol! {
    /// Multicall2 aggregator
    interface IMulticall2 {
        struct Call {
            address target;
            bytes callData;
        }

        struct CallResult {
            bool success;
            bytes returnData;
        }

        function tryAggregate(bool requireSuccess, Call[] calls) external returns (CallResult[] returnData);
    }

    /// Crypto Unicorns diamond facets
    interface IUnicorns {
        function getDNA(uint256 tokenId) external view returns (uint256);

        function getUnicornMetadata(uint256 tokenId)
            external
            view
            returns (
                bool origin,
                bool gameLocked,
                bool limitedEdition,
                uint256 lifecycleStage,
                uint256 breedingPoints,
                uint256 unicornClass,
                uint256 hatchBirthday
            );

        function getUnicornBodyParts(uint256 dna)
            external
            view
            returns (
                uint256 bodyPartId,
                uint256 facePartId,
                uint256 hornPartId,
                uint256 hoovesPartId,
                uint256 manePartId,
                uint256 tailPartId,
                uint8 mythicCount
            );

        function dnaReport(uint256 tokenId)
            external
            view
            returns (uint256 predictive, uint256 live, uint256 canonical, uint256 cached);
    }

    /// Token metadata of the Shadowcorns contract
    interface IShadowcorns {
        function tokenURI(uint256 tokenId) external view returns (string);
    }

    /// Supply of an ERC721 collection (Unicorns diamond or Shadowcorns)
    interface IERC721Enumerable {
        function totalSupply() external view returns (uint256);
    }
}
